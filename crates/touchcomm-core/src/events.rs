//! Notification hooks for upper layers.
//!
//! Lets the embedding layer observe asynchronous device activity without
//! coupling it to the engine internals.

/// Observer for asynchronous device events.
///
/// Implementations must be cheap and non-blocking; the hooks run on the
/// session's consumer thread.
pub trait TcmObserver: Send + Sync {
    /// The device announced itself without a host command in flight,
    /// i.e. it reset on its own.
    fn on_reset(&self) {}

    /// An asynchronous report arrived. The payload is available through
    /// the session's report accessor.
    fn on_report(&self, _code: u8) {}
}

/// Observer that discards all events.
pub struct NullObserver;

impl TcmObserver for NullObserver {}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl TcmObserver for TracingObserver {
    fn on_reset(&self) {
        tracing::warn!("Device has been reset");
    }

    fn on_report(&self, code: u8) {
        tracing::debug!(code = format!("0x{code:02X}"), "Report received");
    }
}
