//! # void_core - Bridge Core Primitives
//!
//! Zero-dependency primitives shared by every crate of the scene bridge:
//! - **EntityId / ComponentId**: opaque handles owned by the host id mapping
//! - **Timestamp**: per-slot logical clock used for last-write-wins
//!
//! Kept free of external dependencies so the scene runtime side can link it
//! without pulling the host stack.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod id;

pub use id::*;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::id::{ComponentId, EntityId, Timestamp};
}
