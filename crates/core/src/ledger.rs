//! Ledger Store - Append-Only, Per-Replica Transfer Ledger
//!
//! Each node keeps one linear chain of accepted transfers. An incoming entry
//! passes these checks in order, stopping at the first failure:
//!
//! 1. Structure: ids present, amount > 0, fee >= 0, seq_nonce > 0
//! 2. Anti-replay: seq_nonce above the highest accepted for the sender
//! 3. Linkage: previous_entry_hash is the local head, index is head + 1
//! 4. Hash integrity: canonical hash matches entry_hash
//! 5. Signatures: sender (and receiver, when present) verify
//! 6. Double spend: input UTXO not already spent
//! 7. Proof of work: entry hash carries enough leading zero bits
//! 8. Funds (optional): sender balance covers amount + fee
//!
//! Accepted entries are never mutated. Rejected entries only survive in a
//! bounded audit log. Divergent remote chains stop a merge at the fork point;
//! the divergent entry is held as `Conflicted` and nothing is rewritten.

use crate::capability::CryptoProvider;
use crate::clock::LogicalClock;
use crate::config::LedgerConfig;
use crate::entry::{leading_zero_bits, EntryStatus, LedgerEntry};
use crate::error::{ConflictError, CryptoError, ValidationError};
use crate::types::Amount;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors raised while creating a local entry
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Signing failed: {0}")]
    Signing(#[from] CryptoError),

    #[error("Proof of work not found within {iterations} iterations")]
    WorkExhausted { iterations: u64 },

    #[error("Invalid transfer: {0}")]
    Invalid(#[from] ValidationError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// A transfer the local node wants to issue
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub sender_id: String,
    pub receiver_id: String,
    pub amount: Amount,
    pub fee: Amount,
    pub coin_type: String,
    pub input_utxo_hash: Option<String>,
    /// Generated from the entry contents when absent
    pub transaction_id: Option<String>,
    pub wall_clock_time: u64,
}

/// Rejected entry retained for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub entry_id: String,
    pub sender_id: String,
    pub sequence_number: u64,
    pub seq_nonce: u64,
    /// Peer that delivered the entry
    pub peer_id: String,
    pub error: ValidationError,
}

/// Result of merging a remote chain segment
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Entries appended
    pub merged: usize,
    /// Entries at or below the local head that were skipped
    pub skipped: usize,
    /// The appended entries, in order
    pub accepted: Vec<LedgerEntry>,
    /// Fork that stopped the merge
    pub fork: Option<ConflictError>,
    /// The forking entry was already in the conflict queue
    pub fork_already_held: bool,
    /// Validation failure that stopped the merge
    pub rejected: Option<ValidationError>,
}

/// Observability counters
#[derive(Debug, Default, Clone)]
pub struct LedgerMetrics {
    pub entries_accepted_total: u64,
    pub entries_rejected_total: u64,
    pub conflicts_total: u64,
}

/// Append-only ledger for one replica
pub struct LedgerStore {
    node_id: String,
    config: LedgerConfig,
    crypto: Arc<dyn CryptoProvider>,
    clock: Arc<LogicalClock>,
    entries: Vec<LedgerEntry>,
    balances: HashMap<String, Amount>,
    last_seq_nonce: HashMap<String, u64>,
    spent_utxos: HashSet<String>,
    audit_log: VecDeque<AuditRecord>,
    conflicts: VecDeque<LedgerEntry>,
    held_conflict_hashes: HashSet<String>,
    metrics: LedgerMetrics,
}

impl LedgerStore {
    /// Create an empty ledger seeded with the configured genesis allocations
    pub fn new(
        node_id: impl Into<String>,
        config: LedgerConfig,
        crypto: Arc<dyn CryptoProvider>,
        clock: Arc<LogicalClock>,
    ) -> Self {
        let balances = config
            .genesis_allocations
            .iter()
            .map(|(account, amount)| (account.clone(), *amount))
            .collect();

        Self {
            node_id: node_id.into(),
            config,
            crypto,
            clock,
            entries: Vec::new(),
            balances,
            last_seq_nonce: HashMap::new(),
            spent_utxos: HashSet::new(),
            audit_log: VecDeque::new(),
            conflicts: VecDeque::new(),
            held_conflict_hashes: HashSet::new(),
            metrics: LedgerMetrics::default(),
        }
    }

    /// Index of the last accepted entry; 0 when empty
    pub fn head_index(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Hash of the last accepted entry
    pub fn head_hash(&self) -> Option<&str> {
        self.entries.last().map(|e| e.entry_hash.as_str())
    }

    /// Entry at a 1-based index
    pub fn entry_at(&self, index: u64) -> Option<&LedgerEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    /// Every accepted entry after `index`, ascending
    pub fn entries_after(&self, index: u64) -> &[LedgerEntry] {
        let start = (index as usize).min(self.entries.len());
        &self.entries[start..]
    }

    /// Current balance of an account
    pub fn balance(&self, account: &str) -> Amount {
        self.balances.get(account).copied().unwrap_or(Amount::ZERO)
    }

    /// Whether a UTXO was consumed by an accepted entry
    pub fn is_spent(&self, utxo: &str) -> bool {
        self.spent_utxos.contains(utxo)
    }

    /// Highest accepted seq_nonce for a sender (0 when none)
    pub fn last_seq_nonce(&self, sender_id: &str) -> u64 {
        self.last_seq_nonce.get(sender_id).copied().unwrap_or(0)
    }

    /// Rejected entries, oldest first
    pub fn audit_log(&self) -> impl Iterator<Item = &AuditRecord> {
        self.audit_log.iter()
    }

    /// Forked entries held for external reconciliation
    pub fn conflicts(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.conflicts.iter()
    }

    /// Observability counters
    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    /// Build, mine and sign a new entry on top of the local head.
    ///
    /// The entry is returned pending; feed it to [`validate_and_append`]
    /// to accept it locally.
    ///
    /// [`validate_and_append`]: LedgerStore::validate_and_append
    pub fn create_entry(&self, request: TransferRequest, secret_key: &[u8]) -> Result<LedgerEntry> {
        let seq_nonce = self.last_seq_nonce(&request.sender_id) + 1;
        let sequence_number = self.head_index() + 1;
        let logical_timestamp = self.clock.tick();

        let transaction_id = request.transaction_id.clone().unwrap_or_else(|| {
            let seed = format!(
                "{}:{}:{}:{}",
                request.sender_id, request.receiver_id, seq_nonce, logical_timestamp
            );
            self.crypto.hash_hex(seed.as_bytes())[..32].to_string()
        });
        let entry_id = {
            let seed = format!("{}:{}", transaction_id, logical_timestamp);
            self.crypto.hash_hex(seed.as_bytes())[..32].to_string()
        };

        let mut entry = LedgerEntry {
            entry_id,
            sequence_number,
            transaction_id,
            sender_id: request.sender_id,
            receiver_id: request.receiver_id,
            amount: request.amount,
            fee: request.fee,
            coin_type: request.coin_type,
            input_utxo_hash: request.input_utxo_hash,
            proof_of_work_nonce: 0,
            logical_timestamp,
            wall_clock_time: request.wall_clock_time,
            sender_signature: Vec::new(),
            receiver_signature: None,
            previous_entry_hash: self.head_hash().map(str::to_string),
            entry_hash: String::new(),
            seq_nonce,
            status: EntryStatus::Pending,
        };

        self.mine(&mut entry)?;
        entry.sender_signature = self.crypto.sign(&entry.signing_payload(), secret_key)?;

        debug!(
            node_id = %self.node_id,
            entry_id = %entry.entry_id,
            seq_nonce = entry.seq_nonce,
            nonce = entry.proof_of_work_nonce,
            "Created ledger entry"
        );

        Ok(entry)
    }

    /// Search a nonce whose entry hash meets the difficulty
    fn mine(&self, entry: &mut LedgerEntry) -> Result<()> {
        let required = self.config.pow_difficulty_bits;
        for nonce in 0..self.config.max_pow_iterations.max(1) {
            entry.proof_of_work_nonce = nonce;
            let hash = entry.compute_hash(self.crypto.as_ref());
            if leading_zero_bits(&hash) >= required {
                entry.entry_hash = hash;
                return Ok(());
            }
        }
        Err(LedgerError::WorkExhausted {
            iterations: self.config.max_pow_iterations,
        })
    }

    /// Run every check against the current state without mutating it.
    pub fn validate(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        self.check_structure(entry)?;
        self.check_replay(entry)?;
        self.check_linkage(entry)?;
        self.check_hash(entry)?;
        self.check_signatures(entry)?;
        self.check_double_spend(entry)?;
        self.check_work(entry)?;
        if self.config.enforce_funds {
            self.check_funds(entry)?;
        }
        Ok(())
    }

    fn check_structure(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        let required = [
            ("entry_id", entry.entry_id.as_str()),
            ("transaction_id", entry.transaction_id.as_str()),
            ("sender_id", entry.sender_id.as_str()),
            ("receiver_id", entry.receiver_id.as_str()),
            ("coin_type", entry.coin_type.as_str()),
            ("entry_hash", entry.entry_hash.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        if entry.sender_signature.is_empty() {
            return Err(ValidationError::MissingField {
                field: "sender_signature".to_string(),
            });
        }
        if !entry.amount.is_positive() {
            return Err(ValidationError::NonPositiveAmount {
                amount: entry.amount.units(),
            });
        }
        if entry.fee.is_negative() {
            return Err(ValidationError::NegativeFee {
                fee: entry.fee.units(),
            });
        }
        if entry.seq_nonce == 0 {
            return Err(ValidationError::ZeroSeqNonce);
        }
        if entry.sender_id == entry.receiver_id {
            return Err(ValidationError::SelfTransfer {
                account: entry.sender_id.clone(),
            });
        }
        Ok(())
    }

    fn check_replay(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        let last_accepted = self.last_seq_nonce(&entry.sender_id);
        if entry.seq_nonce <= last_accepted {
            return Err(ValidationError::Replay {
                sender_id: entry.sender_id.clone(),
                seq_nonce: entry.seq_nonce,
                last_accepted,
            });
        }
        Ok(())
    }

    fn check_linkage(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        let expected = self.head_hash();
        if entry.previous_entry_hash.as_deref() != expected {
            return Err(ValidationError::LinkageMismatch {
                expected: expected.map(str::to_string),
                actual: entry.previous_entry_hash.clone(),
            });
        }
        let expected_index = self.head_index() + 1;
        if entry.sequence_number != expected_index {
            return Err(ValidationError::SequenceGap {
                expected: expected_index,
                actual: entry.sequence_number,
            });
        }
        Ok(())
    }

    fn check_hash(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        let computed = entry.compute_hash(self.crypto.as_ref());
        if computed != entry.entry_hash {
            return Err(ValidationError::HashMismatch {
                declared: entry.entry_hash.clone(),
                computed,
            });
        }
        Ok(())
    }

    fn check_signatures(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        let payload = entry.signing_payload();
        if !self.verify_account(&entry.sender_id, &payload, &entry.sender_signature) {
            return Err(ValidationError::InvalidSignature {
                sender_id: entry.sender_id.clone(),
            });
        }
        if let Some(receiver_signature) = &entry.receiver_signature {
            if !self.verify_account(&entry.receiver_id, &payload, receiver_signature) {
                return Err(ValidationError::InvalidSignature {
                    sender_id: entry.receiver_id.clone(),
                });
            }
        }
        Ok(())
    }

    fn verify_account(&self, account_id: &str, payload: &[u8], signature: &[u8]) -> bool {
        match hex::decode(account_id) {
            Ok(public_key) => self.crypto.verify(payload, signature, &public_key),
            Err(_) => false,
        }
    }

    fn check_double_spend(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        if let Some(utxo) = &entry.input_utxo_hash {
            if self.spent_utxos.contains(utxo) {
                return Err(ValidationError::DoubleSpend { utxo: utxo.clone() });
            }
        }
        Ok(())
    }

    fn check_work(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        let required = self.config.pow_difficulty_bits;
        if required == 0 {
            return Ok(());
        }
        let leading_zeros = leading_zero_bits(&entry.entry_hash);
        if leading_zeros < required {
            return Err(ValidationError::InsufficientWork {
                leading_zeros,
                required,
            });
        }
        Ok(())
    }

    fn check_funds(&self, entry: &LedgerEntry) -> std::result::Result<(), ValidationError> {
        let required = entry.total_debit().ok_or_else(|| ValidationError::Overflow {
            entry_id: entry.entry_id.clone(),
        })?;
        let balance = self.balance(&entry.sender_id);
        if balance < required {
            return Err(ValidationError::InsufficientFunds {
                account: entry.sender_id.clone(),
                balance: balance.units(),
                required: required.units(),
            });
        }
        Ok(())
    }

    /// Validate an entry and append it on success.
    ///
    /// Failures are recorded in the audit log and logged at warning level
    /// with the delivering peer; they are never retried.
    pub fn validate_and_append(
        &mut self,
        entry: LedgerEntry,
        from_peer: &str,
    ) -> std::result::Result<LedgerEntry, ValidationError> {
        if let Err(err) = self.validate(&entry) {
            self.reject(&entry, from_peer, err.clone());
            return Err(err);
        }
        match self.apply(entry) {
            Ok(accepted) => Ok(accepted),
            Err((entry, err)) => {
                self.reject(&entry, from_peer, err.clone());
                Err(err)
            }
        }
    }

    fn apply(
        &mut self,
        mut entry: LedgerEntry,
    ) -> std::result::Result<LedgerEntry, (LedgerEntry, ValidationError)> {
        let overflow = |entry: &LedgerEntry| ValidationError::Overflow {
            entry_id: entry.entry_id.clone(),
        };

        let debit = match entry.total_debit() {
            Some(d) => d,
            None => {
                let err = overflow(&entry);
                return Err((entry, err));
            }
        };
        let sender_balance = match self.balance(&entry.sender_id).checked_sub(debit) {
            Some(b) => b,
            None => {
                let err = overflow(&entry);
                return Err((entry, err));
            }
        };
        let receiver_balance = match self.balance(&entry.receiver_id).checked_add(entry.amount) {
            Some(b) => b,
            None => {
                let err = overflow(&entry);
                return Err((entry, err));
            }
        };

        self.balances.insert(entry.sender_id.clone(), sender_balance);
        self.balances.insert(entry.receiver_id.clone(), receiver_balance);
        self.last_seq_nonce
            .insert(entry.sender_id.clone(), entry.seq_nonce);
        if let Some(utxo) = &entry.input_utxo_hash {
            self.spent_utxos.insert(utxo.clone());
        }
        self.clock.merge(&entry.logical_timestamp);

        entry.status = EntryStatus::Accepted;
        self.entries.push(entry.clone());
        self.metrics.entries_accepted_total += 1;

        info!(
            node_id = %self.node_id,
            index = entry.sequence_number,
            entry_id = %entry.entry_id,
            sender_id = %entry.sender_id,
            amount = %entry.amount,
            "Ledger entry accepted"
        );

        Ok(entry)
    }

    fn reject(&mut self, entry: &LedgerEntry, from_peer: &str, err: ValidationError) {
        warn!(
            node_id = %self.node_id,
            peer_id = %from_peer,
            entry_id = %entry.entry_id,
            sender_id = %entry.sender_id,
            reason = err.reason(),
            error = %err,
            "Ledger entry rejected"
        );
        self.metrics.entries_rejected_total += 1;
        if self.config.audit_log_capacity == 0 {
            return;
        }
        if self.audit_log.len() >= self.config.audit_log_capacity {
            self.audit_log.pop_front();
        }
        self.audit_log.push_back(AuditRecord {
            entry_id: entry.entry_id.clone(),
            sender_id: entry.sender_id.clone(),
            sequence_number: entry.sequence_number,
            seq_nonce: entry.seq_nonce,
            peer_id: from_peer.to_string(),
            error: err,
        });
    }

    /// Queue a divergent entry. Returns false when the same entry is already held.
    fn hold_conflict(&mut self, mut entry: LedgerEntry, conflict: &ConflictError) -> bool {
        if self.held_conflict_hashes.contains(&entry.entry_hash) {
            debug!(
                node_id = %self.node_id,
                peer_id = %conflict.peer_id,
                index = conflict.index,
                entry_hash = %entry.entry_hash,
                "Divergent entry already held"
            );
            return false;
        }
        error!(
            node_id = %self.node_id,
            peer_id = %conflict.peer_id,
            index = conflict.index,
            local_head = ?conflict.local_head,
            remote_previous = ?conflict.remote_previous,
            "Ledger fork detected; holding divergent entry for reconciliation"
        );
        self.metrics.conflicts_total += 1;
        if self.config.conflict_capacity == 0 {
            return true;
        }
        if self.conflicts.len() >= self.config.conflict_capacity {
            if let Some(evicted) = self.conflicts.pop_front() {
                self.held_conflict_hashes.remove(&evicted.entry_hash);
            }
        }
        entry.status = EntryStatus::Conflicted;
        self.held_conflict_hashes.insert(entry.entry_hash.clone());
        self.conflicts.push_back(entry);
        true
    }

    /// Merge a remote chain segment.
    ///
    /// Entries are processed in ascending index order. Entries at or below
    /// the local head are skipped. The merge stops at the first entry whose
    /// previous hash diverges from the current head (a fork, held and
    /// surfaced, never resolved here) or at the first validation failure.
    pub fn merge_remote_chain(&mut self, mut entries: Vec<LedgerEntry>, from_peer: &str) -> MergeOutcome {
        entries.sort_by_key(|e| e.sequence_number);
        let mut outcome = MergeOutcome::default();

        for entry in entries {
            if entry.sequence_number <= self.head_index() {
                outcome.skipped += 1;
                continue;
            }

            let head = self.head_hash().map(str::to_string);
            if entry.previous_entry_hash != head {
                if entry.sequence_number == self.head_index() + 1 {
                    let conflict = ConflictError {
                        index: entry.sequence_number,
                        peer_id: from_peer.to_string(),
                        local_head: head,
                        remote_previous: entry.previous_entry_hash.clone(),
                    };
                    outcome.fork_already_held = !self.hold_conflict(entry, &conflict);
                    outcome.fork = Some(conflict);
                } else {
                    let err = ValidationError::SequenceGap {
                        expected: self.head_index() + 1,
                        actual: entry.sequence_number,
                    };
                    self.reject(&entry, from_peer, err.clone());
                    outcome.rejected = Some(err);
                }
                break;
            }

            match self.validate_and_append(entry, from_peer) {
                Ok(accepted) => {
                    outcome.merged += 1;
                    outcome.accepted.push(accepted);
                }
                Err(err) => {
                    outcome.rejected = Some(err);
                    break;
                }
            }
        }

        debug!(
            node_id = %self.node_id,
            peer_id = %from_peer,
            merged = outcome.merged,
            skipped = outcome.skipped,
            head = self.head_index(),
            "Merged remote chain segment"
        );

        outcome
    }

    /// Rebuild state from persisted entries on startup.
    ///
    /// Every entry is re-validated; replay stops at the first failure.
    pub fn replay<I>(&mut self, entries: I) -> std::result::Result<usize, ValidationError>
    where
        I: IntoIterator<Item = LedgerEntry>,
    {
        let mut replayed = 0;
        for mut entry in entries {
            entry.status = EntryStatus::Pending;
            self.validate_and_append(entry, "store")?;
            replayed += 1;
        }
        info!(node_id = %self.node_id, replayed, "Ledger replay complete");
        Ok(replayed)
    }
}
