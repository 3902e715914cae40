//! Error taxonomy shared by every public entry point.

use thiserror::Error;

use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum TcmError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bus I/O failed: {0}")]
    Bus(#[from] TransportError),

    #[error("Packet exchange for command 0x{command:02X} corrupted after {attempts} attempts")]
    ProtocolCorrupted { command: u8, attempts: u32 },

    #[error("Unexpected status 0x{status:02X} for command 0x{command:02X}")]
    UnexpectedStatus { command: u8, status: u8 },

    #[error("No response to command 0x{command:02X} within {timeout_ms}ms")]
    Timeout { command: u8, timeout_ms: u64 },

    #[error("Device returned error status 0x{status:02X} for command 0x{command:02X}")]
    ErrorStatus { command: u8, status: u8 },

    #[error("No TouchComm v2 device detected")]
    NoDevice,

    #[error("Session is shut down")]
    SessionClosed,
}
