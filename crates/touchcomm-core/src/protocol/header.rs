//! Packet header codec for TouchComm v2.
//!
//! Every packet starts with a 4-byte header: a command or status code,
//! a 16-bit little-endian payload length, and a control byte packing the
//! host-role marker (bit 7), the sequence-toggle bit (bit 6) and a 6-bit
//! CRC residue over the rest of the header (bits 0-5).

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::{
    BITS_IN_MESSAGE_HEADER, HEADER_CRC_MASK, HOST_PRIMARY, MESSAGE_HEADER_SIZE,
};
use super::crc::{crc6, crc16};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("Header too short: expected {MESSAGE_HEADER_SIZE} bytes, got {actual}")]
    Truncated { actual: usize },
    #[error("Corrupt header, residue 0x{residue:02X}")]
    CorruptHeader { residue: u8 },
    #[error("Sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },
    #[error("Corrupt payload, residue 0x{residue:04X}")]
    CorruptPayload { residue: u16 },
}

/// Decoded view of a validated packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Command, status or report code.
    pub code: u8,
    /// Payload length declared by the sender.
    pub length: u16,
    /// Sequence-toggle bit carried in the control byte.
    pub seq_bit: u8,
}

/// Build a 4-byte packet header with the CRC residue embedded.
///
/// The residue is the CRC register state after the first 26 header bits
/// (everything except the residue field itself); shifting those 6 bits
/// through afterwards drains the register, so validation over the full
/// 32 stored bits comes out zero.
pub fn encode_header(code: u8, seq_bit: u8, length: u16) -> [u8; MESSAGE_HEADER_SIZE] {
    let mut header = [0u8; MESSAGE_HEADER_SIZE];
    header[0] = code;
    LittleEndian::write_u16(&mut header[1..3], length);
    header[3] = (HOST_PRIMARY & 0x01) << 7;
    header[3] |= (seq_bit & 0x01) << 6;
    header[3] |= crc6(&header, BITS_IN_MESSAGE_HEADER - 6) & HEADER_CRC_MASK;
    header
}

/// Validate a packet header and decode its fields.
///
/// The CRC check covers all 32 header bits including the stored residue
/// and must come out zero. When `expected_seq` is given, the embedded
/// sequence bit must match it as well; a stale retransmission therefore
/// fails validation instead of masquerading as a fresh packet.
pub fn validate_header(
    bytes: &[u8],
    expected_seq: Option<u8>,
) -> Result<PacketHeader, FrameError> {
    if bytes.len() < MESSAGE_HEADER_SIZE {
        return Err(FrameError::Truncated { actual: bytes.len() });
    }

    let residue = crc6(&bytes[..MESSAGE_HEADER_SIZE], BITS_IN_MESSAGE_HEADER);
    if residue != 0 {
        return Err(FrameError::CorruptHeader {
            residue: bytes[3] & HEADER_CRC_MASK,
        });
    }

    let seq_bit = (bytes[3] >> 6) & 0x01;
    if let Some(expected) = expected_seq {
        let expected = expected & 0x01;
        if seq_bit != expected {
            return Err(FrameError::SequenceMismatch {
                expected,
                actual: seq_bit,
            });
        }
    }

    Ok(PacketHeader {
        code: bytes[0],
        length: LittleEndian::read_u16(&bytes[1..3]),
        seq_bit,
    })
}

/// Validate the trailing CRC-16 of a full frame (header, payload and
/// 2-byte trailer). Only meaningful for frames carrying a payload.
pub fn validate_payload_crc(frame: &[u8]) -> Result<(), FrameError> {
    let residue = crc16(frame, 0xFFFF);
    if residue != 0 {
        let trailer = if frame.len() >= 2 {
            ((frame[frame.len() - 2] as u16) << 8) | frame[frame.len() - 1] as u16
        } else {
            0
        };
        return Err(FrameError::CorruptPayload { residue: trailer });
    }
    Ok(())
}

/// Append the big-endian CRC-16 trailer covering `frame` so far.
pub fn append_payload_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame, 0xFFFF);
    frame.push((crc >> 8) as u8);
    frame.push((crc & 0xFF) as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = encode_header(0x2A, 1, 0x1234);
        let parsed = validate_header(&header, Some(1)).unwrap();
        assert_eq!(parsed.code, 0x2A);
        assert_eq!(parsed.length, 0x1234);
        assert_eq!(parsed.seq_bit, 1);
    }

    #[test]
    fn header_rejects_any_single_bit_flip() {
        let header = encode_header(0x04, 0, 0x0040);
        for bit in 0..32 {
            let mut corrupted = header;
            corrupted[bit / 8] ^= 1 << (7 - (bit % 8));
            let result = validate_header(&corrupted, None);
            assert!(
                matches!(result, Err(FrameError::CorruptHeader { .. })),
                "flip of bit {bit} not detected: {result:?}"
            );
        }
    }

    #[test]
    fn header_rejects_stale_sequence() {
        let header = encode_header(0x01, 0, 0);
        assert!(validate_header(&header, Some(0)).is_ok());
        assert_eq!(
            validate_header(&header, Some(1)),
            Err(FrameError::SequenceMismatch {
                expected: 1,
                actual: 0
            })
        );
    }

    #[test]
    fn header_rejects_truncated_input() {
        assert_eq!(
            validate_header(&[0x01, 0x02], None),
            Err(FrameError::Truncated { actual: 2 })
        );
    }

    #[test]
    fn payload_crc_roundtrip_and_corruption() {
        let mut frame = encode_header(0x01, 0, 4).to_vec();
        frame.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        append_payload_crc(&mut frame);
        assert!(validate_payload_crc(&frame).is_ok());

        for idx in 0..frame.len() {
            let mut corrupted = frame.clone();
            corrupted[idx] ^= 0x80;
            assert!(
                validate_payload_crc(&corrupted).is_err(),
                "byte {idx} flip not detected"
            );
        }
    }
}
