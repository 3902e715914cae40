//! Transport layer module.

pub mod mock;
pub mod traits;

pub use mock::MockBus;
pub use traits::{BusTransport, TransportError};
