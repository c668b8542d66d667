//! # Void CRDT - Scene State Reconciliation
//!
//! Scenes run sandboxed on their own threads and talk to the host only by
//! exchanging timestamped state mutations. Each side merges what it receives
//! deterministically, whatever the arrival order.
//!
//! ## Architecture
//!
//! ```text
//! bytes ──► codec::decode ──► CrdtMessage ──► ReconciliationStore ──► effects
//! ProcessedMessage batch ──► codec::encode_into ──► bytes
//! ```
//!
//! ## Key Concepts
//!
//! - **CrdtMessage**: put / delete component, delete entity, append
//! - **ReconciliationStore**: last-write-wins slots plus append logs
//! - **Wire codec**: fixed-width headers, length-prefixed payloads

pub mod codec;
pub mod error;
pub mod message;
pub mod store;

pub use codec::{decode, decode_into, encode_into, encode_message, encoded_len, validate, HEADER_LEN, WIRE_FORMAT_VERSION};
pub use error::{WireError, WireResult};
pub use message::{CrdtMessage, CrdtMessageType, ProcessedMessage};
pub use store::{
    Reconciliation, ReconciliationEffect, ReconciliationResult, ReconciliationStats, ReconciliationStore,
    StoreConfig, StoredComponent,
};

pub use void_core::{ComponentId, EntityId, Timestamp};
pub use void_memory::{BufferPool, OwnedBuffer};
