//! Buffer pool - reusable payload buffers shared across threads
//!
//! Scenes produce and consume many small payloads every tick. The pool keeps
//! released buffers on per-size free lists so steady-state traffic does not
//! touch the global allocator. Requests larger than the biggest class are
//! served by a one-off allocation that is simply freed on release.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::buffer::OwnedBuffer;
use crate::size_class::SizeClasses;

/// How released buffers are grouped for reuse
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PoolPolicy {
    /// Power-of-two buckets, excess capacity trimmed on return
    #[default]
    SizeClassed,
    /// One free list per exact length, may fragment under varied sizes
    ExactSize,
}

/// Pool configuration
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub policy: PoolPolicy,
    /// Smallest bucket, rounded up to a power of two
    pub min_class_size: usize,
    /// Largest pooled length, larger requests bypass the pool
    pub max_class_size: usize,
    /// Free buffers kept per bucket, extra returns are freed
    pub max_retained_per_class: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            policy: PoolPolicy::SizeClassed,
            min_class_size: 16,
            max_class_size: 64 * 1024,
            max_retained_per_class: 256,
        }
    }
}

/// Pool statistics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out, including fallbacks
    pub checkouts: usize,
    /// Checkouts served from a free list
    pub reuses: usize,
    /// Checkouts too large for any bucket
    pub fallbacks: usize,
    /// Buffers given back to a free list
    pub returns: usize,
    /// Returned buffers freed because their bucket was full
    pub trimmed: usize,
    /// Buffers currently sitting in free lists
    pub retained: usize,
}

#[derive(Default)]
struct Counters {
    checkouts: AtomicUsize,
    reuses: AtomicUsize,
    fallbacks: AtomicUsize,
    returns: AtomicUsize,
    trimmed: AtomicUsize,
}

type FreeList = Vec<Vec<u8>>;

pub(crate) struct PoolShared {
    config: PoolConfig,
    classes: SizeClasses,
    /// One free list per size class, padded so neighbouring locks don't share a line
    buckets: Box<[CachePadded<Mutex<FreeList>>]>,
    /// Free lists keyed by exact length
    exact: Mutex<HashMap<usize, FreeList>>,
    counters: Counters,
}

/// Thread-safe pool of payload buffers
///
/// Cloning is cheap, all clones share the same free lists.
#[derive(Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool with the given configuration
    pub fn new(config: PoolConfig) -> Self {
        let classes = SizeClasses::new(config.min_class_size, config.max_class_size);
        let buckets = (0..classes.count())
            .map(|_| CachePadded::new(Mutex::new(Vec::new())))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shared: Arc::new(PoolShared {
                config,
                classes,
                buckets,
                exact: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Get a writable buffer of exactly `length` bytes
    ///
    /// The content is zeroed. A zero length never allocates.
    pub fn get_buffer(&self, length: usize) -> OwnedBuffer {
        if length == 0 {
            return OwnedBuffer::empty();
        }

        let mut bytes = self.shared.checkout(length);
        bytes.resize(length, 0);
        self.wrap(bytes, length)
    }

    /// Get an owned copy of `source[offset..offset + length]`
    ///
    /// Returns `None` if the range is outside of `source`.
    pub fn copy_slice(&self, source: &[u8], offset: usize, length: usize) -> Option<OwnedBuffer> {
        let end = offset.checked_add(length)?;
        let slice = source.get(offset..end)?;
        Some(self.copy_from(slice))
    }

    /// Get an owned copy of `bytes`
    pub fn copy_from(&self, bytes: &[u8]) -> OwnedBuffer {
        if bytes.is_empty() {
            return OwnedBuffer::empty();
        }

        let mut buffer = self.shared.checkout(bytes.len());
        buffer.extend_from_slice(bytes);
        self.wrap(buffer, bytes.len())
    }

    /// Get the configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        let counters = &self.shared.counters;
        PoolStats {
            checkouts: counters.checkouts.load(Ordering::Relaxed),
            reuses: counters.reuses.load(Ordering::Relaxed),
            fallbacks: counters.fallbacks.load(Ordering::Relaxed),
            returns: counters.returns.load(Ordering::Relaxed),
            trimmed: counters.trimmed.load(Ordering::Relaxed),
            retained: self.shared.retained(),
        }
    }

    fn wrap(&self, bytes: Vec<u8>, length: usize) -> OwnedBuffer {
        if length > self.shared.classes.max_size() {
            // Oversized buffers are not returned anywhere
            OwnedBuffer::unpooled(bytes)
        } else {
            OwnedBuffer::pooled(bytes, Arc::clone(&self.shared))
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("policy", &self.shared.config.policy)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolShared {
    /// Take an empty buffer able to hold `length` bytes without reallocating
    fn checkout(&self, length: usize) -> Vec<u8> {
        self.counters.checkouts.fetch_add(1, Ordering::Relaxed);

        if length > self.classes.max_size() {
            self.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "Payload of {} bytes exceeds largest pool class ({}), allocating one-off",
                length,
                self.classes.max_size()
            );
            return Vec::with_capacity(length);
        }

        let recycled = match self.config.policy {
            PoolPolicy::SizeClassed => self
                .classes
                .class_for(length)
                .and_then(|index| self.buckets[index].lock().pop()),
            PoolPolicy::ExactSize => self
                .exact
                .lock()
                .get_mut(&length)
                .and_then(|list| list.pop()),
        };

        match recycled {
            Some(mut bytes) => {
                self.counters.reuses.fetch_add(1, Ordering::Relaxed);
                bytes.clear();
                bytes
            }
            None => {
                let capacity = match self.config.policy {
                    PoolPolicy::SizeClassed => self
                        .classes
                        .class_for(length)
                        .map_or(length, |index| self.classes.class_size(index)),
                    PoolPolicy::ExactSize => length,
                };
                Vec::with_capacity(capacity)
            }
        }
    }

    /// Give a buffer back to its free list
    ///
    /// `length` is the length it was checked out with.
    pub(crate) fn give_back(&self, mut bytes: Vec<u8>, length: usize) {
        let max_retained = self.config.max_retained_per_class;

        let kept = match self.config.policy {
            PoolPolicy::SizeClassed => match self.classes.class_for_capacity(bytes.capacity()) {
                Some(index) => {
                    let class_size = self.classes.class_size(index);
                    if bytes.capacity() > class_size {
                        bytes.shrink_to(class_size);
                    }
                    bytes.clear();

                    let mut bucket = self.buckets[index].lock();
                    if bucket.len() < max_retained {
                        bucket.push(bytes);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            },
            PoolPolicy::ExactSize => {
                bytes.clear();
                let mut exact = self.exact.lock();
                let list = exact.entry(length).or_default();
                if list.len() < max_retained {
                    list.push(bytes);
                    true
                } else {
                    false
                }
            }
        };

        if kept {
            self.counters.returns.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.trimmed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn retained(&self) -> usize {
        let bucketed: usize = self.buckets.iter().map(|bucket| bucket.lock().len()).sum();
        let exact: usize = self.exact.lock().values().map(Vec::len).sum();
        bucketed + exact
    }
}
