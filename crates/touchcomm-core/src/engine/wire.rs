//! Single-packet bus exchanges.
//!
//! One `read_packet`/`write_packet` pair maps to one raw bus transfer.
//! Framing errors never abort the exchange here; a failed validation is
//! recorded as `STATUS_PACKET_CORRUPTED` so the caller can drive the
//! retry protocol. Raw bus failures do abort.

use tracing::{debug, warn};

use crate::error::TcmError;
use crate::protocol::constants::{
    CMD_GET_REPORT, MESSAGE_HEADER_SIZE, PAYLOAD_CRC_SIZE, STATUS_IDLE, STATUS_INVALID,
    STATUS_PACKET_CORRUPTED,
};
use crate::protocol::crc::crc16;
use crate::protocol::header::{encode_header, validate_header, validate_payload_crc};
use crate::transport::{BusTransport, TransportError};

use super::TouchCommV2;

impl<T: BusTransport> TouchCommV2<T> {
    /// Read one packet: the 4-byte header plus `rd_length` payload bytes
    /// (and their CRC) when the caller prefetches payload.
    ///
    /// On success the decoded code and payload length are stored in the
    /// message state; a validation failure stores
    /// `STATUS_PACKET_CORRUPTED` instead and still returns `Ok`.
    pub(crate) fn read_packet(&mut self, rd_length: usize) -> Result<(), TcmError> {
        let mut xfer_len = rd_length;
        if rd_length > 0 {
            xfer_len += PAYLOAD_CRC_SIZE;
        }
        xfer_len += MESSAGE_HEADER_SIZE;
        if self.state.extra_trailer_byte {
            // Some firmware tacks one scrap byte onto every transfer;
            // read it, ignore it.
            xfer_len += 1;
        }

        if self.max_read_size != 0 && xfer_len > self.max_read_size {
            self.state.status_report_code = STATUS_INVALID;
            return Err(TcmError::InvalidArgument(format!(
                "transfer of {xfer_len} bytes exceeds the max read size {}",
                self.max_read_size
            )));
        }

        self.buffers.scratch.reserve(xfer_len);
        let n = self
            .transport
            .read(&mut self.buffers.scratch.as_mut_slice()[..xfer_len])?;
        if n != xfer_len {
            return Err(TcmError::Bus(TransportError::ShortTransfer {
                expected: xfer_len,
                actual: n,
            }));
        }
        self.buffers.scratch.set_data_length(xfer_len);

        let scratch = self.buffers.scratch.data();
        let header = match validate_header(scratch, Some(self.state.seq_toggle & 0x01)) {
            Ok(header) => header,
            Err(err) => {
                warn!(error = %err, "Inbound header failed validation");
                self.state.status_report_code = STATUS_PACKET_CORRUPTED;
                return Ok(());
            }
        };

        if self.state.payload_crc && rd_length > 0 && header.length > 0 {
            // The device pads over-long reads; the CRC sits right after
            // the real payload.
            let span =
                MESSAGE_HEADER_SIZE + (header.length as usize).min(rd_length) + PAYLOAD_CRC_SIZE;
            if let Err(err) = validate_payload_crc(&scratch[..span]) {
                warn!(error = %err, "Inbound payload failed validation");
                self.state.status_report_code = STATUS_PACKET_CORRUPTED;
                return Ok(());
            }
        }

        self.state.status_report_code = header.code;
        self.state.payload_length = header.length as usize;
        if header.code != STATUS_IDLE {
            debug!(
                code = format!("0x{:02X}", header.code),
                length = header.length,
                "Packet received"
            );
        }
        Ok(())
    }

    /// Write one packet carrying `payload` while the header length field
    /// announces `length_field` bytes, which for a chunked transfer is
    /// the length of the whole message rather than of this chunk.
    ///
    /// The sequence toggle advances unless this is a resend of the
    /// previous packet.
    pub(crate) fn write_packet(
        &mut self,
        command: u8,
        payload: &[u8],
        length_field: usize,
        resend: bool,
    ) -> Result<(), TcmError> {
        let mut total = MESSAGE_HEADER_SIZE;
        if !payload.is_empty() {
            total += payload.len() + PAYLOAD_CRC_SIZE;
        }

        if !resend {
            self.state.seq_toggle = self.state.seq_toggle.wrapping_add(1);
        }

        let header = encode_header(command, self.state.seq_toggle & 0x01, length_field as u16);
        self.buffers.outbound.reserve(total);
        let staged = self.buffers.outbound.as_mut_slice();
        staged[..MESSAGE_HEADER_SIZE].copy_from_slice(&header);
        if !payload.is_empty() {
            let crc_at = MESSAGE_HEADER_SIZE + payload.len();
            staged[MESSAGE_HEADER_SIZE..crc_at].copy_from_slice(payload);
            let crc = crc16(&staged[..crc_at], 0xFFFF);
            staged[crc_at] = (crc >> 8) as u8;
            staged[crc_at + 1] = (crc & 0xFF) as u8;
        }
        self.buffers.outbound.set_data_length(total);

        let n = self.transport.write(&self.buffers.outbound.data()[..total])?;
        if n != total {
            return Err(TcmError::Bus(TransportError::ShortTransfer {
                expected: total,
                actual: n,
            }));
        }

        // With prediction on, a report fetch prefetches as much of the
        // announced payload as one bounded transfer allows.
        if self.config.predict_reads && command == CMD_GET_REPORT {
            self.state.predict_length = if self.max_read_size == 0 {
                self.state.payload_length
            } else {
                self.state.payload_length.min(
                    self.max_read_size
                        .saturating_sub(MESSAGE_HEADER_SIZE + PAYLOAD_CRC_SIZE),
                )
            };
        } else {
            self.state.predict_length = 0;
        }

        debug!(
            command = format!("0x{command:02X}"),
            length = payload.len(),
            resend,
            "Packet sent"
        );
        Ok(())
    }
}
