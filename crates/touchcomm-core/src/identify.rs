//! Identification report decoding.
//!
//! The identify packet carries the firmware's self-description: protocol
//! version, operating mode, part number, build id and the transfer size
//! limits used for chunk negotiation.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

/// Fixed-size prefix of the identify payload, up to and including
/// `max_write_size`. Legacy firmware stops after `max_read_size`.
const IDENTIFY_FIXED_SIZE: usize = 1 + 1 + 16 + 4 + 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdentifyError {
    #[error("Identify payload too short: expected at least {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Identify payload carries zero build id")]
    ZeroBuildId,
}

/// Decoded identification info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyInfo {
    /// Protocol version reported by the firmware.
    pub version: u8,
    /// Current firmware mode (application, bootloader, ...).
    pub mode: u8,
    /// ASCII part number, unparsed.
    pub part_number: [u8; 16],
    /// Firmware build id.
    pub build_id: u32,
    /// Largest packet the device accepts, in bytes.
    pub max_write_size: u16,
    /// Largest packet the device emits, in bytes.
    pub max_read_size: u16,
    /// Largest packet the device could emit if asked. Absent on legacy
    /// firmware, which caps reads at `max_read_size` outright.
    pub max_possible_read_size: Option<u16>,
}

impl IdentifyInfo {
    /// Decode an identify payload.
    ///
    /// The decode is all-or-nothing: a malformed payload yields an error
    /// and the caller keeps its previous identification intact.
    pub fn parse(payload: &[u8]) -> Result<Self, IdentifyError> {
        if payload.len() < IDENTIFY_FIXED_SIZE + 2 {
            return Err(IdentifyError::TooShort {
                expected: IDENTIFY_FIXED_SIZE + 2,
                actual: payload.len(),
            });
        }

        let mut cursor = Cursor::new(payload);
        let mut info = IdentifyInfo {
            version: cursor.read_u8().unwrap_or_default(),
            mode: cursor.read_u8().unwrap_or_default(),
            ..Default::default()
        };
        for byte in info.part_number.iter_mut() {
            *byte = cursor.read_u8().unwrap_or_default();
        }
        info.build_id = cursor.read_u32::<LittleEndian>().unwrap_or_default();
        info.max_write_size = cursor.read_u16::<LittleEndian>().unwrap_or_default();
        info.max_read_size = cursor.read_u16::<LittleEndian>().unwrap_or_default();
        info.max_possible_read_size = cursor.read_u16::<LittleEndian>().ok();

        if info.build_id == 0 {
            return Err(IdentifyError::ZeroBuildId);
        }
        Ok(info)
    }

    /// Whether the payload came from legacy firmware that does not
    /// declare a possible read size.
    pub fn is_legacy(&self) -> bool {
        self.max_possible_read_size.is_none()
    }

    /// Effective maximum read size: the declared maximum, capped by the
    /// possible maximum when the firmware provides one.
    pub fn effective_read_size(&self) -> u16 {
        match self.max_possible_read_size {
            Some(possible) => self.max_read_size.min(possible),
            None => self.max_read_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identify_payload(
        mode: u8,
        build_id: u32,
        wr: u16,
        rd: u16,
        possible_rd: Option<u16>,
    ) -> Vec<u8> {
        let mut payload = vec![2u8, mode];
        payload.extend_from_slice(b"TD4321-A        ");
        payload.extend_from_slice(&build_id.to_le_bytes());
        payload.extend_from_slice(&wr.to_le_bytes());
        payload.extend_from_slice(&rd.to_le_bytes());
        if let Some(possible) = possible_rd {
            payload.extend_from_slice(&possible.to_le_bytes());
        }
        payload
    }

    #[test]
    fn decodes_sizes_and_build_id() {
        let payload = identify_payload(0x01, 1, 0x0020, 0x0040, Some(0x0040));
        let info = IdentifyInfo::parse(&payload).unwrap();
        assert_eq!(info.build_id, 1);
        assert_eq!(info.mode, 1);
        assert_eq!(info.max_write_size, 32);
        assert_eq!(info.max_read_size, 64);
        assert_eq!(info.effective_read_size(), 64);
        assert!(!info.is_legacy());
    }

    #[test]
    fn possible_read_size_caps_the_declared_one() {
        let payload = identify_payload(0x01, 7, 256, 512, Some(128));
        let info = IdentifyInfo::parse(&payload).unwrap();
        assert_eq!(info.effective_read_size(), 128);
    }

    #[test]
    fn legacy_payload_without_possible_read_size() {
        let payload = identify_payload(0x0B, 99, 64, 64, None);
        let info = IdentifyInfo::parse(&payload).unwrap();
        assert!(info.is_legacy());
        assert_eq!(info.effective_read_size(), 64);
    }

    #[test]
    fn truncated_payload_is_discarded_whole() {
        let payload = identify_payload(0x01, 1, 32, 64, None);
        assert!(matches!(
            IdentifyInfo::parse(&payload[..10]),
            Err(IdentifyError::TooShort { .. })
        ));
    }

    #[test]
    fn zero_build_id_rejected() {
        let payload = identify_payload(0x01, 0, 32, 64, Some(64));
        assert_eq!(IdentifyInfo::parse(&payload), Err(IdentifyError::ZeroBuildId));
    }
}
