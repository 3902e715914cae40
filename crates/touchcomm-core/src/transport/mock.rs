//! Mock bus transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{BusTransport, TransportError};

#[derive(Default)]
struct MockBusInner {
    /// Queued device-to-host transfers, one entry per bus read.
    reads: VecDeque<Vec<u8>>,
    /// Captured host-to-device transfers.
    writes: Vec<Vec<u8>>,
    /// Whether the device is "connected".
    connected: bool,
}

/// Mock transport for unit testing the protocol engine.
///
/// Clones share the same queues, so a test can keep a handle while the
/// engine owns another and script the device from a second thread.
#[derive(Clone)]
pub struct MockBus {
    inner: Arc<Mutex<MockBusInner>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockBusInner {
                connected: true,
                ..Default::default()
            })),
        }
    }

    /// Queue bytes to be returned by the next bus read.
    pub fn queue_read(&self, data: &[u8]) {
        self.inner.lock().unwrap().reads.push_back(data.to_vec());
    }

    /// Get all captured writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().writes.clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.inner.lock().unwrap().writes.clear();
    }

    /// Number of queued reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.inner.lock().unwrap().reads.len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        self.inner.lock().unwrap().connected = false;
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusTransport for MockBus {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        let data = inner
            .reads
            .pop_front()
            .ok_or_else(|| TransportError::ReadFailed("read queue empty".into()))?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.connected {
            return Err(TransportError::Disconnected);
        }
        inner.writes.push(data.to_vec());
        Ok(data.len())
    }
}
