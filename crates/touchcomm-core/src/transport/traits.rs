//! Bus transport abstraction.
//!
//! Defines the `BusTransport` trait for the raw byte channel underneath
//! the protocol engine, allowing different implementations (I2C, SPI
//! bridges, mock, etc.). The protocol layer never retries raw I/O
//! failures; it only retries packets that arrived but failed validation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("Device disconnected")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract half-duplex byte channel to the device.
///
/// This trait enables:
/// - Production implementations over the platform bus
/// - Mock implementation for unit testing
pub trait BusTransport: Send {
    /// Read exactly `buf.len()` bytes worth of bus data into `buf`,
    /// returning the number of bytes actually delivered.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write the given bytes to the device, returning the number of
    /// bytes actually accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;
}
