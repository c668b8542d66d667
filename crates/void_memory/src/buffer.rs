//! Owned payload buffer checked out of a [`BufferPool`](crate::BufferPool)

use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::pool::PoolShared;

/// A byte buffer with a single owner
///
/// Releasing hands the memory back to the pool it came from and leaves the
/// buffer empty, so releasing twice (or dropping after a release) does nothing.
pub struct OwnedBuffer {
    bytes: Vec<u8>,
    /// Length the buffer was checked out with, used to pick the free list
    length: usize,
    home: Option<Arc<PoolShared>>,
}

impl OwnedBuffer {
    /// A zero-length buffer, never allocates
    #[inline]
    pub const fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            length: 0,
            home: None,
        }
    }

    /// Wrap bytes that do not belong to any pool
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self::unpooled(bytes)
    }

    pub(crate) fn unpooled(bytes: Vec<u8>) -> Self {
        Self {
            length: bytes.len(),
            bytes,
            home: None,
        }
    }

    pub(crate) fn pooled(bytes: Vec<u8>, home: Arc<PoolShared>) -> Self {
        Self {
            length: bytes.len(),
            bytes,
            home: Some(home),
        }
    }

    /// Number of bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer holds no bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether releasing will return the memory to a pool
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.home.is_some()
    }

    /// View the bytes
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Return the memory to its pool now
    ///
    /// The buffer is empty afterwards. Calling this again is a no-op.
    pub fn release(&mut self) {
        let bytes = core::mem::take(&mut self.bytes);
        let length = core::mem::take(&mut self.length);

        if let Some(home) = self.home.take() {
            home.give_back(bytes, length);
        }
    }

    /// Move the contents out, leaving an empty buffer behind
    pub fn take(&mut self) -> OwnedBuffer {
        core::mem::replace(self, OwnedBuffer::empty())
    }
}

impl Default for OwnedBuffer {
    fn default() -> Self {
        Self::empty()
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl Deref for OwnedBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl DerefMut for OwnedBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl AsRef<[u8]> for OwnedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for OwnedBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for OwnedBuffer {}

impl fmt::Debug for OwnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedBuffer")
            .field("len", &self.bytes.len())
            .field("pooled", &self.home.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BufferPool;

    #[test]
    fn test_double_release_is_noop() {
        let pool = BufferPool::default();
        let mut buffer = pool.get_buffer(40);

        buffer.release();
        buffer.release();
        drop(buffer);

        let stats = pool.stats();
        assert_eq!(stats.returns, 1);
        assert_eq!(stats.retained, 1);
    }

    #[test]
    fn test_take_moves_ownership() {
        let pool = BufferPool::default();
        let mut source = pool.copy_from(b"payload");

        let moved = source.take();
        assert!(source.is_empty());
        assert!(!source.is_pooled());
        assert_eq!(&*moved, b"payload");

        drop(source);
        assert_eq!(pool.stats().returns, 0);
        drop(moved);
        assert_eq!(pool.stats().returns, 1);
    }

    #[test]
    fn test_equality_compares_bytes() {
        let pool = BufferPool::default();
        assert_eq!(pool.copy_from(b"abc"), OwnedBuffer::from_vec(b"abc".to_vec()));
        assert_ne!(pool.copy_from(b"abc"), pool.copy_from(b"abd"));
        assert_eq!(OwnedBuffer::empty(), pool.get_buffer(0));
    }
}
