//! Error types for OffMesh mesh operations.
//!
//! Component errors from the core are wrapped here so node-level code can
//! use `?` throughout. At the public node boundary every error is collapsed
//! into an [`Outcome`].

use offmesh_core::config::ConfigError;
use offmesh_core::error::{
    ConflictError, Outcome, RoutingError, StoreError, TransportError, ValidationError,
};
use offmesh_core::ledger::LedgerError;
use thiserror::Error;

/// Dispatch queue errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// Queue is full and the item does not outrank the lowest queued item
    #[error("Dispatch queue full (capacity {capacity})")]
    QueueFull { capacity: usize },
}

/// Errors that can occur in mesh operations.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Ledger entry rejected
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No viable path
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Link-level send failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Ledger fork
    #[error("Ledger conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Dispatch queue refused an item
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Local entry creation failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Persistent store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl MeshError {
    /// Short machine-readable reason label
    pub fn reason(&self) -> &'static str {
        match self {
            MeshError::Validation(err) => err.reason(),
            MeshError::Routing(RoutingError::NoRoute { .. }) => "no_route",
            MeshError::Routing(RoutingError::NoPeers) => "no_peers",
            MeshError::Transport(_) => "transport",
            MeshError::Conflict(_) => "conflict",
            MeshError::Dispatch(DispatchError::QueueFull { .. }) => "queue_full",
            MeshError::Ledger(LedgerError::Invalid(err)) => err.reason(),
            MeshError::Ledger(LedgerError::Signing(_)) => "signing",
            MeshError::Ledger(LedgerError::WorkExhausted { .. }) => "work_exhausted",
            MeshError::Store(_) | MeshError::Database(_) => "store",
            MeshError::Serialization(_) => "malformed",
            MeshError::Config(_) => "config",
            MeshError::InvalidState(_) => "invalid_state",
        }
    }
}

impl From<&MeshError> for Outcome {
    fn from(err: &MeshError) -> Self {
        Outcome::Rejected(err.reason().to_string())
    }
}

/// Result type for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;
