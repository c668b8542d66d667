//! Error types for the scene bridge

use thiserror::Error;
use void_crdt::WireError;

use crate::fault::FaultKind;

/// Errors raised while moving state across the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Malformed wire data: {0}")]
    Wire(#[from] WireError),

    #[error("Outgoing batch is closed")]
    BatchClosed,

    #[error("Panic in {operation}: {message}")]
    Panicked { operation: &'static str, message: String },
}

impl BridgeError {
    /// Fault category reported to the scene's owner
    pub fn kind(&self) -> FaultKind {
        match self {
            BridgeError::Wire(_) => FaultKind::MalformedWireData,
            BridgeError::BatchClosed => FaultKind::BatchClosed,
            BridgeError::Panicked { .. } => FaultKind::Panic,
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors from loading a bridge configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}
