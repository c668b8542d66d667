//! # void_memory - Pooled Payload Buffers
//!
//! Every CRDT message owns a byte payload. Allocating those per message would
//! dominate a busy scene tick, so payloads are checked out of a shared pool:
//! - BufferPool: thread-safe free lists, size-classed or exact-size
//! - OwnedBuffer: single-owner handle that returns itself on release
//! - SizeClasses: power-of-two bucketing used by the size-classed policy

pub mod buffer;
pub mod pool;
pub mod size_class;

pub use buffer::OwnedBuffer;
pub use pool::{BufferPool, PoolConfig, PoolPolicy, PoolStats};
pub use size_class::SizeClasses;

pub mod prelude {
    pub use crate::{BufferPool, OwnedBuffer, PoolConfig, PoolPolicy, PoolStats};
}
