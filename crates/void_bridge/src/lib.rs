//! # Void Bridge - Scene Runtime Boundary
//!
//! Connects a sandboxed scene runtime to the host world. Each tick the scene
//! pushes its CRDT messages in and pulls the host's messages out, both as
//! flat byte buffers.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  push_state   ┌─────────────────────┐  net effects  ┌───────────┐
//! │ Scene thread │──────────────►│ ReconciliationStore │──────────────►│ HostWorld │
//! │              │◄──────────────│                     │               └───────────┘
//! └──────────────┘  pull_state   └─────────────────────┘
//!         ▲                                  host systems (any thread)
//!         └──── OutgoingMessages ◄──────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **SceneBridge**: guarded push / pull / get entry points
//! - **OutgoingMessages**: append-only batch with an exclusive drain scope
//! - **WorldSyncBuffer**: collapses a tick's effects per component
//! - **Faults**: errors and panics are reported, never propagated

pub mod bridge;
pub mod config;
pub mod error;
pub mod fault;
pub mod outgoing;
pub mod world_sync;

pub use bridge::{BridgeStats, DisposeHandle, SceneBridge};
pub use config::{BridgeConfig, BridgeSection, PolicySetting, PoolSection, StoreSection};
pub use error::{BridgeError, BridgeResult, ConfigError};
pub use fault::{fault_channel, FaultKind, FaultReporter, SceneFault};
pub use outgoing::{DrainScope, OutgoingMessages};
pub use world_sync::{HostWorld, NullWorld, SyncSummary, WorldSyncBuffer};

pub mod prelude {
    pub use crate::{
        fault_channel, BridgeConfig, FaultKind, HostWorld, OutgoingMessages, SceneBridge, SceneFault,
    };
    pub use void_crdt::{ComponentId, CrdtMessage, EntityId, Timestamp};
    pub use void_memory::BufferPool;
}
