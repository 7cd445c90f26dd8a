//! Frame accumulator.
//!
//! Absorbs arbitrarily sized input chunks and hands out exactly `n`
//! contiguous bytes at a time. The decode loop always peeks before it takes,
//! so a partially received frame stays buffered until the rest arrives.

use bytes::{Bytes, BytesMut};

use crate::common::errors::AdapterError;

#[derive(Debug, Default)]
pub struct Adapter {
    buf: BytesMut,
}

impl Adapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the end of the buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes.
    pub fn available(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the first `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Result<&[u8], AdapterError> {
        self.check(n)?;
        Ok(&self.buf[..n])
    }

    /// Remove and return the first `n` bytes.
    ///
    /// The returned `Bytes` owns its memory; nothing is copied.
    pub fn take(&mut self, n: usize) -> Result<Bytes, AdapterError> {
        self.check(n)?;
        Ok(self.buf.split_to(n).freeze())
    }

    /// Discard everything. Called on discontinuities, flushes and EOS.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn check(&self, n: usize) -> Result<(), AdapterError> {
        if self.buf.len() < n {
            return Err(AdapterError::InsufficientData {
                needed: n,
                available: self.buf.len(),
            });
        }
        Ok(())
    }
}
