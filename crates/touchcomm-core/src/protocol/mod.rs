//! Wire protocol layer: constants, CRC routines and the header codec.

pub mod constants;
pub mod crc;
pub mod header;

pub use constants::{MESSAGE_HEADER_SIZE, PAYLOAD_CRC_SIZE, is_report_code};
pub use header::{FrameError, PacketHeader, encode_header, validate_header, validate_payload_crc};
