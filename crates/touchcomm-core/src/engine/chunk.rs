//! Payload reassembly across bounded transfers.
//!
//! A response or report larger than one transfer arrives in chunks. The
//! device resends the original header in front of every chunk with the
//! length field rewritten to the remaining byte count, so the true total
//! is re-read from the first stored header once reassembly is done.

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::error::TcmError;
use crate::protocol::constants::{
    CMD_ACK, MESSAGE_HEADER_SIZE, PAYLOAD_CRC_SIZE, STATUS_PACKET_CORRUPTED,
};
use crate::transport::BusTransport;

use super::TouchCommV2;

impl<T: BusTransport> TouchCommV2<T> {
    /// Pull the remaining `length` payload bytes of the announced packet
    /// into the inbound buffer, acknowledging and retrying per chunk.
    pub(crate) fn continued_read(&mut self, length: usize) -> Result<(), TcmError> {
        let total_length = MESSAGE_HEADER_SIZE + self.state.payload_length;
        let mut remaining = length;
        let mut offset = MESSAGE_HEADER_SIZE + (self.state.payload_length - length);

        self.buffers.inbound.reserve(total_length);

        let chunk_space = if self.max_read_size == 0 {
            remaining
        } else {
            self.max_read_size
                .saturating_sub(MESSAGE_HEADER_SIZE + PAYLOAD_CRC_SIZE)
        };
        let chunks = if remaining == 0 || chunk_space == 0 {
            1
        } else {
            remaining.div_ceil(chunk_space)
        };

        let mut retry_cnt: u32 = 0;
        for idx in 0..chunks {
            let xfer = remaining.min(chunk_space);
            loop {
                // Legacy firmware wants an ACK before every chunk; newer
                // firmware only before continuation chunks.
                let need_ack = self.state.legacy || idx > 0 || offset > MESSAGE_HEADER_SIZE;
                if need_ack || retry_cnt > 0 {
                    self.write_packet(CMD_ACK, &[], 0, retry_cnt > 0)?;
                }
                self.read_packet(xfer)?;
                if self.state.status_report_code != STATUS_PACKET_CORRUPTED {
                    retry_cnt = 0;
                    break;
                }
                retry_cnt += 1;
                if retry_cnt > self.config.retry_limit {
                    return Err(TcmError::ProtocolCorrupted {
                        command: self.state.command,
                        attempts: self.config.retry_limit,
                    });
                }
                warn!(chunk = idx, retry = retry_cnt, "Chunk corrupted, requesting resend");
                std::thread::sleep(self.config.retry_delay());
            }

            let src = &self.buffers.scratch.data()[MESSAGE_HEADER_SIZE..MESSAGE_HEADER_SIZE + xfer];
            self.buffers.inbound.as_mut_slice()[offset..offset + xfer].copy_from_slice(src);
            remaining -= xfer;
            offset += xfer;
        }

        // Chunk headers carried remaining counts; restore the total from
        // the first header kept at the front of the inbound buffer.
        let stored = self.buffers.inbound.as_slice();
        self.state.payload_length = LittleEndian::read_u16(&stored[1..3]) as usize;
        self.buffers.inbound.set_data_length(offset);
        Ok(())
    }

    /// Read the response to the command just written: the header (plus
    /// any predicted payload) and whatever continuation chunks follow.
    ///
    /// Leaves `STATUS_PACKET_CORRUPTED` in the state instead of failing
    /// when the first transfer does not validate.
    pub(crate) fn read_response(&mut self) -> Result<(), TcmError> {
        let prefetch = if self.config.predict_reads {
            self.state.predict_length
        } else {
            0
        };

        self.read_packet(prefetch)?;
        if self.state.status_report_code == STATUS_PACKET_CORRUPTED {
            return Ok(());
        }

        let copied = (MESSAGE_HEADER_SIZE + prefetch).min(self.buffers.scratch.data_length());
        let total_length = MESSAGE_HEADER_SIZE + self.state.payload_length;
        self.buffers.inbound.reserve(total_length.max(copied));
        let src = &self.buffers.scratch.data()[..copied];
        self.buffers.inbound.as_mut_slice()[..copied].copy_from_slice(src);
        self.buffers.inbound.set_data_length(copied);

        let remaining = self.state.payload_length.saturating_sub(prefetch);
        if self.state.payload_length > 0 && remaining > 0 {
            self.continued_read(remaining)?;
        }

        let stored = self.buffers.inbound.as_slice();
        self.state.status_report_code = stored[0];
        self.state.payload_length = LittleEndian::read_u16(&stored[1..3]) as usize;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ProtocolConfig;
    use crate::engine::testutil::{corrupt_frame, engine_with, fast_config, frame, header_only};
    use crate::error::TcmError;
    use crate::protocol::constants::{CMD_ACK, CMD_GET_REPORT, STATUS_CONTINUED_READ, STATUS_OK};
    use crate::transport::MockBus;

    #[test]
    fn response_spanning_three_chunks_is_reassembled() {
        let bus = MockBus::new();
        // max_read 16 leaves 10 payload bytes per transfer.
        let payload: Vec<u8> = (0u8..24).collect();

        let mut engine = engine_with(&bus, fast_config());
        engine.set_transfer_limits(64, 16);

        // Command write advances the sequence to 1; each continuation
        // ACK advances it again.
        bus.queue_read(&header_only(STATUS_OK, 24, 1));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 24, &payload[..10], 1));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 14, &payload[10..20], 0));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 4, &payload[20..], 1));

        engine.write_packet(CMD_GET_REPORT, &[], 0, false).unwrap();
        engine.read_response().unwrap();

        assert_eq!(engine.state.status_report_code, STATUS_OK);
        assert_eq!(engine.state.payload_length, 24);
        assert_eq!(&engine.buffers.inbound.data()[4..28], &payload[..]);

        // One GET_REPORT plus one ACK per continuation chunk; the first
        // chunk follows the response header directly.
        let writes = bus.writes();
        assert_eq!(writes.len(), 3);
        for ack in &writes[1..] {
            assert_eq!(ack[0], CMD_ACK);
        }
    }

    #[test]
    fn first_chunk_after_response_header_needs_no_ack() {
        let bus = MockBus::new();
        let payload = [0x55u8; 8];

        let mut engine = engine_with(&bus, fast_config());
        engine.set_transfer_limits(64, 32);

        bus.queue_read(&header_only(STATUS_OK, 8, 1));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 8, &payload, 1));

        engine.write_packet(CMD_GET_REPORT, &[], 0, false).unwrap();
        engine.read_response().unwrap();

        // Only the original command went out; the single chunk fits one
        // transfer and directly follows the header.
        assert_eq!(bus.writes().len(), 1);
        assert_eq!(&engine.buffers.inbound.data()[4..12], &payload);
    }

    #[test]
    fn legacy_firmware_gets_an_ack_before_the_first_chunk() {
        let bus = MockBus::new();
        let payload = [0xA5u8; 8];

        let mut engine = engine_with(&bus, fast_config());
        engine.set_transfer_limits(64, 32);
        engine.state.legacy = true;

        bus.queue_read(&header_only(STATUS_OK, 8, 1));
        // The ACK advances the sequence before the chunk arrives.
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 8, &payload, 0));

        engine.write_packet(CMD_GET_REPORT, &[], 0, false).unwrap();
        engine.read_response().unwrap();

        let writes = bus.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1][0], CMD_ACK);
        assert_eq!(&engine.buffers.inbound.data()[4..12], &payload);
    }

    #[test]
    fn predicted_fetch_takes_the_payload_in_one_transfer() {
        let bus = MockBus::new();
        let payload: Vec<u8> = (0u8..8).collect();

        let config = ProtocolConfig {
            predict_reads: true,
            ..fast_config()
        };
        let mut engine = engine_with(&bus, config);
        engine.set_transfer_limits(64, 32);
        // The previous exchange announced how much the next one carries.
        engine.state.payload_length = 8;

        bus.queue_read(&frame(STATUS_OK, 8, &payload, 1));

        engine.write_packet(CMD_GET_REPORT, &[], 0, false).unwrap();
        engine.read_response().unwrap();

        assert_eq!(engine.state.status_report_code, STATUS_OK);
        assert_eq!(engine.state.payload_length, 8);
        assert_eq!(&engine.buffers.inbound.data()[4..12], &payload[..]);
        // No continuation ACKs and no second transfer.
        assert_eq!(bus.writes().len(), 1);
        assert_eq!(bus.pending_reads(), 0);
    }

    #[test]
    fn corrupted_chunk_is_retried_with_the_same_sequence() {
        let bus = MockBus::new();
        let payload: Vec<u8> = (0u8..12).collect();

        let mut engine = engine_with(&bus, fast_config());
        engine.set_transfer_limits(64, 16);

        bus.queue_read(&header_only(STATUS_OK, 12, 1));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 12, &payload[..10], 1));
        bus.queue_read(&corrupt_frame(STATUS_CONTINUED_READ, 2, &payload[10..], 0));
        bus.queue_read(&frame(STATUS_CONTINUED_READ, 2, &payload[10..], 0));

        engine.write_packet(CMD_GET_REPORT, &[], 0, false).unwrap();
        engine.read_response().unwrap();

        assert_eq!(&engine.buffers.inbound.data()[4..16], &payload[..]);

        // The retried ACK reuses the sequence bit of the failed one.
        let writes = bus.writes();
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[1][0], CMD_ACK);
        assert_eq!(writes[2][0], CMD_ACK);
        let seq_of = |frame: &Vec<u8>| (frame[3] >> 6) & 0x01;
        assert_eq!(seq_of(&writes[1]), 0);
        assert_eq!(seq_of(&writes[2]), 0);
    }

    #[test]
    fn retry_bound_aborts_the_transfer() {
        let bus = MockBus::new();
        let mut engine = engine_with(&bus, fast_config());
        engine.set_transfer_limits(64, 16);

        bus.queue_read(&header_only(STATUS_OK, 12, 1));
        // Every retried transfer asks for the full first chunk again.
        for _ in 0..6 {
            bus.queue_read(&corrupt_frame(STATUS_CONTINUED_READ, 12, &[0u8; 10], 1));
        }

        engine.write_packet(CMD_GET_REPORT, &[], 0, false).unwrap();
        let err = engine.read_response().unwrap_err();
        assert!(matches!(err, TcmError::ProtocolCorrupted { .. }));
        assert_eq!(bus.pending_reads(), 0);
    }
}
