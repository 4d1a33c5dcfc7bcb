//! Error taxonomy shared across the OffMesh crates.
//!
//! Every failure in the core falls in one of four families:
//!
//! - [`ValidationError`]: a malformed, forged or replayed ledger entry. Never retried.
//! - [`RoutingError`]: no viable path after reputation filtering. Surfaced to the caller.
//! - [`TransportError`]: a single send failed. Retried up to a bound, then dropped.
//! - [`ConflictError`]: a ledger fork seen during merge. Held for external reconciliation.
//!
//! At the node boundary every outcome collapses into an [`Outcome`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a ledger entry was rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    /// A required field is missing or empty
    #[error("Missing or empty field: {field}")]
    MissingField { field: String },

    /// Amount must be strictly positive
    #[error("Amount must be positive, got {amount}")]
    NonPositiveAmount { amount: i64 },

    /// Fee must not be negative
    #[error("Fee must not be negative, got {fee}")]
    NegativeFee { fee: i64 },

    /// Sender and receiver are the same account
    #[error("Sender and receiver must differ: {account}")]
    SelfTransfer { account: String },

    /// seqNonce must be at least 1
    #[error("seq_nonce must be greater than zero")]
    ZeroSeqNonce,

    /// seqNonce does not advance past the highest accepted one
    #[error("Replay detected for sender {sender_id}: seq_nonce {seq_nonce} <= last accepted {last_accepted}")]
    Replay {
        sender_id: String,
        seq_nonce: u64,
        last_accepted: u64,
    },

    /// previousEntryHash does not point at the local head
    #[error("Linkage mismatch: expected previous hash {expected:?}, got {actual:?}")]
    LinkageMismatch {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// sequenceNumber does not follow the local head
    #[error("Sequence gap: expected index {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    /// Recomputed canonical hash differs from the declared one
    #[error("Hash mismatch: declared {declared}, computed {computed}")]
    HashMismatch { declared: String, computed: String },

    /// Sender signature does not verify
    #[error("Invalid signature from sender {sender_id}")]
    InvalidSignature { sender_id: String },

    /// The referenced UTXO was already spent by an accepted entry
    #[error("Double spend of UTXO {utxo}")]
    DoubleSpend { utxo: String },

    /// Entry hash does not carry enough leading zero bits
    #[error("Insufficient proof of work: {leading_zeros} leading zero bits, need {required}")]
    InsufficientWork { leading_zeros: u32, required: u32 },

    /// Sender balance does not cover amount plus fee
    #[error("Insufficient funds for {account}: balance {balance}, required {required}")]
    InsufficientFunds {
        account: String,
        balance: i64,
        required: i64,
    },

    /// Arithmetic overflow while applying the entry
    #[error("Arithmetic overflow applying entry {entry_id}")]
    Overflow { entry_id: String },
}

impl ValidationError {
    /// Short machine-readable reason label used in audit records.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::MissingField { .. } => "missing_field",
            ValidationError::NonPositiveAmount { .. } => "non_positive_amount",
            ValidationError::NegativeFee { .. } => "negative_fee",
            ValidationError::SelfTransfer { .. } => "self_transfer",
            ValidationError::ZeroSeqNonce => "zero_seq_nonce",
            ValidationError::Replay { .. } => "replay",
            ValidationError::LinkageMismatch { .. } => "linkage_mismatch",
            ValidationError::SequenceGap { .. } => "sequence_gap",
            ValidationError::HashMismatch { .. } => "hash_mismatch",
            ValidationError::InvalidSignature { .. } => "invalid_signature",
            ValidationError::DoubleSpend { .. } => "double_spend",
            ValidationError::InsufficientWork { .. } => "insufficient_work",
            ValidationError::InsufficientFunds { .. } => "insufficient_funds",
            ValidationError::Overflow { .. } => "overflow",
        }
    }
}

/// No viable path to a destination.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    /// Every candidate route was filtered out (or none were discovered)
    #[error("No route to {target} after filtering {filtered} of {discovered} candidates")]
    NoRoute {
        target: String,
        discovered: usize,
        filtered: usize,
    },

    /// No connected peers to relay through
    #[error("No connected peers")]
    NoPeers,
}

/// A single transport operation failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Peer is not connected
    #[error("Peer not connected: {peer_id}")]
    NotConnected { peer_id: String },

    /// Send did not complete in time
    #[error("Send to {peer_id} timed out")]
    Timeout { peer_id: String },

    /// Link-level failure
    #[error("Send to {peer_id} failed: {reason}")]
    SendFailed { peer_id: String, reason: String },
}

/// A ledger fork detected while merging a remote chain.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Fork at index {index} from {peer_id}: local head {local_head:?}, remote previous {remote_previous:?}")]
pub struct ConflictError {
    /// Index of the divergent remote entry
    pub index: u64,
    /// Peer that supplied the divergent entry
    pub peer_id: String,
    /// Local head hash at the fork point
    pub local_head: Option<String>,
    /// previousEntryHash carried by the remote entry
    pub remote_previous: Option<String>,
}

/// Persistent store failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Stored record could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Cryptographic capability failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material has the wrong shape
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption or authentication failed
    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Boundary outcome. No raw error crosses the node boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Operation completed
    Accepted,
    /// Operation refused, with a reason label
    Rejected(String),
    /// Operation queued and may still complete
    QueuedForRetry,
}

impl Outcome {
    /// Check if the outcome is accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted)
    }
}

impl From<&ValidationError> for Outcome {
    fn from(err: &ValidationError) -> Self {
        Outcome::Rejected(err.reason().to_string())
    }
}
