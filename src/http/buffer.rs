//! Fixed-capacity byte buffer with overflow detection.
//!
//! [`FixedBuffer`] never grows past the capacity it was created with. An
//! append that would not fit marks the buffer overflowed, and every further
//! append is refused until [`FixedBuffer::reset`] is called. Callers that read
//! directly from a socket use [`FixedBuffer::spare_mut`] + [`FixedBuffer::commit`]
//! so bytes land in place without an intermediate copy.

use thiserror::Error;

/// Returned when an append does not fit in the remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer overflow: capacity {capacity} bytes")]
pub struct Overflow {
    pub capacity: usize,
}

/// Append-only byte buffer with a hard capacity.
pub struct FixedBuffer {
    data: Box<[u8]>,
    len: usize,
    overflowed: bool,
}

impl FixedBuffer {
    /// Allocate a zeroed buffer of exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            overflowed: false,
        }
    }

    /// Append `bytes`, returning how many were appended.
    ///
    /// Nothing is copied if the bytes do not fit; the buffer is then
    /// overflowed and unusable until reset.
    pub fn append(&mut self, bytes: &[u8]) -> Result<usize, Overflow> {
        if self.overflowed || !self.fits(bytes.len()) {
            self.overflowed = true;
            return Err(Overflow {
                capacity: self.capacity(),
            });
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(bytes.len())
    }

    /// Whether `additional` more bytes fit. Never changes state.
    pub fn fits(&self, additional: usize) -> bool {
        !self.overflowed && additional <= self.remaining()
    }

    /// Writable tail of the buffer. Empty once overflowed.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        if self.overflowed {
            return &mut [];
        }
        &mut self.data[self.len..]
    }

    /// Mark `n` bytes of [`spare_mut`](Self::spare_mut) as written.
    pub fn commit(&mut self, n: usize) -> Result<(), Overflow> {
        if !self.fits(n) {
            self.overflowed = true;
            return Err(Overflow {
                capacity: self.capacity(),
            });
        }
        self.len += n;
        Ok(())
    }

    /// Roll back to a previously observed length and clear the overflow flag.
    pub fn rollback(&mut self, len: usize) {
        self.len = self.len.min(len);
        self.overflowed = false;
    }

    /// Clear contents and the overflow flag.
    pub fn reset(&mut self) {
        self.len = 0;
        self.overflowed = false;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn ends_with(&self, suffix: &[u8]) -> bool {
        self.as_slice().ends_with(suffix)
    }
}

/// Zero-capacity placeholder, used when a buffer is lent out.
impl Default for FixedBuffer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for FixedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("overflowed", &self.overflowed)
            .finish()
    }
}
