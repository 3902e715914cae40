//! Host-side TouchComm v2 protocol engine.
//!
//! Implements the command/response transport used by TouchComm touch
//! controllers over a raw byte channel: packet framing with CRC-6
//! protected headers and CRC-16 protected payloads, sequence-toggle
//! tracking, chunked transfers within negotiated size limits, bounded
//! retries, and dispatch of asynchronous device reports.
//!
//! The layers, bottom up:
//! - [`transport`]: the [`BusTransport`] byte channel and a mock bus
//! - [`protocol`]: wire constants, CRCs and header framing
//! - [`engine`]: the [`TouchCommV2`] engine driving full exchanges
//! - [`detect`]: device qualification and bootstrap
//! - [`session`]: a consumer thread owning the engine, with cloneable
//!   handles for concurrent callers
//!
//! ```no_run
//! use std::sync::Arc;
//! use touchcomm_core::{
//!     detect, MockBus, ProtocolConfig, ResponseMode, TcmSession, TracingObserver,
//! };
//!
//! # fn main() -> Result<(), touchcomm_core::TcmError> {
//! let bus = MockBus::new();
//! let startup = [0x10, 0x00, 0x00, 0x2E];
//! let engine = detect(bus, &startup, ProtocolConfig::default(), Arc::new(TracingObserver))?;
//!
//! let session = TcmSession::spawn(engine);
//! let handle = session.handle();
//! let response = handle.execute(0x02, &[], 0, ResponseMode::Attn)?;
//! println!("identify: {:02X?}", response.payload);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod detect;
pub mod engine;
pub mod error;
pub mod events;
pub mod identify;
pub mod protocol;
pub mod session;
pub mod transport;

pub use buffer::PayloadBuffer;
pub use config::ProtocolConfig;
pub use detect::detect;
pub use engine::{
    CommandResponse, CommandStatus, ProtocolEngine, ResponseMode, TouchCommV2, WriteOutcome,
};
pub use error::TcmError;
pub use events::{NullObserver, TcmObserver, TracingObserver};
pub use identify::{IdentifyError, IdentifyInfo};
pub use session::{SessionHandle, TcmSession};
pub use transport::{BusTransport, MockBus, TransportError};
