//! Growable payload buffers.
//!
//! The engine keeps a small set of reusable buffers (outbound staging,
//! inbound reassembly, decode scratch, response, report and the
//! externally visible copy). Capacity only ever grows so steady-state
//! traffic stops allocating; the valid data length is tracked separately
//! from capacity.

/// A reusable byte buffer with independent capacity and data length.
#[derive(Debug, Default)]
pub struct PayloadBuffer {
    buf: Vec<u8>,
    data_length: usize,
}

impl PayloadBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure at least `size` bytes of backing storage. Never shrinks.
    pub fn reserve(&mut self, size: usize) {
        if self.buf.len() < size {
            self.buf.resize(size, 0);
        }
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Length of the currently valid data.
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Mark the first `len` bytes as valid. `len` must not exceed capacity.
    pub fn set_data_length(&mut self, len: usize) {
        debug_assert!(len <= self.buf.len());
        self.data_length = len.min(self.buf.len());
    }

    /// The currently valid data.
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.data_length]
    }

    /// Mutable access to the full backing storage.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Read-only access to the full backing storage.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Replace the valid data with a copy of `src`, growing as needed.
    pub fn fill_from(&mut self, src: &[u8]) {
        self.reserve(src.len());
        self.buf[..src.len()].copy_from_slice(src);
        self.data_length = src.len();
    }

    /// Drop the valid data without releasing capacity.
    pub fn clear(&mut self) {
        self.data_length = 0;
    }
}
