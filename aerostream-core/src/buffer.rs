//! Receive buffer shared between a background receive loop and drains

use bytes::{Bytes, BytesMut};

/// Append-only accumulator of received bytes
///
/// Chunks are kept in arrival order. [`ReadBuffer::drain`] hands the whole
/// content to the caller and leaves the buffer empty.
#[derive(Debug, Default)]
pub struct ReadBuffer {
    data: BytesMut,
}

impl ReadBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a received chunk
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
    }

    /// Take everything accumulated so far, or `None` if nothing is buffered
    pub fn drain(&mut self) -> Option<Bytes> {
        if self.data.is_empty() {
            return None;
        }
        Some(self.data.split().freeze())
    }

    /// Drop buffered bytes and release the storage
    pub fn clear(&mut self) {
        self.data = BytesMut::new();
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
