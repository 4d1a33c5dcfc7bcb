//! Core functionality for the OffMesh mesh ledger.
//!
//! This crate provides the shared types, capability traits, logical clock,
//! configuration and the append-only ledger store used across the OffMesh
//! crates. It has no networking of its own.

pub mod capability;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod types;

#[cfg(test)]
mod testing;

pub use capability::{CryptoProvider, Transport, TransportEvent, DIGEST_LEN};
pub use clock::{LogicalClock, LogicalTimestamp, ManualTimeSource, SystemTimeSource, TimeSource};
pub use config::{ConfigError, MeshConfig};
pub use entry::{leading_zero_bits, EntryStatus, LedgerEntry};
pub use error::{
    ConflictError, CryptoError, Outcome, RoutingError, StoreError, TransportError,
    ValidationError,
};
pub use ledger::{
    AuditRecord, LedgerError, LedgerMetrics, LedgerStore, MergeOutcome, TransferRequest,
};
pub use types::{Amount, AmountError, PeerId};
