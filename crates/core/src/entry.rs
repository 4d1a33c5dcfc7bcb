//! Ledger entry model and its canonical hashing rules.
//!
//! The entry hash commits to every field except the signatures, the wall
//! clock time and the status. Signatures are made over the raw hash bytes.

use crate::capability::CryptoProvider;
use crate::clock::LogicalTimestamp;
use crate::types::Amount;
use serde::{Deserialize, Serialize};

/// Lifecycle of an entry. Every state except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Pending,
    Accepted,
    Rejected,
    Conflicted,
}

/// One transfer in the append-only ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry identifier
    pub entry_id: String,
    /// Position in the ledger, starting at 1
    pub sequence_number: u64,
    /// Transaction identifier chosen by the sender
    pub transaction_id: String,
    /// Hex-encoded Ed25519 verifying key of the sender
    pub sender_id: String,
    /// Hex-encoded Ed25519 verifying key of the receiver
    pub receiver_id: String,
    pub amount: Amount,
    pub fee: Amount,
    pub coin_type: String,
    /// Output consumed by this transfer, spendable exactly once
    pub input_utxo_hash: Option<String>,
    pub proof_of_work_nonce: u64,
    pub logical_timestamp: LogicalTimestamp,
    /// Unix milliseconds at creation. Not hashed.
    pub wall_clock_time: u64,
    #[serde(with = "hex_bytes")]
    pub sender_signature: Vec<u8>,
    #[serde(with = "hex_bytes_opt")]
    pub receiver_signature: Option<Vec<u8>>,
    /// Hash of the entry this one extends; None for the first entry
    pub previous_entry_hash: Option<String>,
    /// Hex digest of the canonical fields
    pub entry_hash: String,
    /// Per-sender counter, strictly increasing across accepted entries
    pub seq_nonce: u64,
    pub status: EntryStatus,
}

/// Hashed view of an entry. Field order is part of the format.
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    entry_id: &'a str,
    sequence_number: u64,
    transaction_id: &'a str,
    sender_id: &'a str,
    receiver_id: &'a str,
    amount: i64,
    fee: i64,
    coin_type: &'a str,
    input_utxo_hash: Option<&'a str>,
    proof_of_work_nonce: u64,
    logical_timestamp: &'a LogicalTimestamp,
    previous_entry_hash: Option<&'a str>,
    seq_nonce: u64,
}

impl LedgerEntry {
    /// Deterministic bytes covered by the entry hash.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let canonical = CanonicalEntry {
            entry_id: &self.entry_id,
            sequence_number: self.sequence_number,
            transaction_id: &self.transaction_id,
            sender_id: &self.sender_id,
            receiver_id: &self.receiver_id,
            amount: self.amount.units(),
            fee: self.fee.units(),
            coin_type: &self.coin_type,
            input_utxo_hash: self.input_utxo_hash.as_deref(),
            proof_of_work_nonce: self.proof_of_work_nonce,
            logical_timestamp: &self.logical_timestamp,
            previous_entry_hash: self.previous_entry_hash.as_deref(),
            seq_nonce: self.seq_nonce,
        };
        // Plain strings and integers only; serialization cannot fail.
        serde_json::to_vec(&canonical).unwrap_or_default()
    }

    /// Recompute the hex entry hash from the canonical fields
    pub fn compute_hash(&self, crypto: &dyn CryptoProvider) -> String {
        crypto.hash_hex(&self.canonical_bytes())
    }

    /// Bytes the sender and receiver sign
    pub fn signing_payload(&self) -> Vec<u8> {
        hex::decode(&self.entry_hash).unwrap_or_else(|_| self.entry_hash.as_bytes().to_vec())
    }

    /// Total debited from the sender
    pub fn total_debit(&self) -> Option<Amount> {
        self.amount.checked_add(self.fee)
    }
}

/// Leading zero bits of a hex digest. Non-hex input counts as zero.
pub fn leading_zero_bits(hash_hex: &str) -> u32 {
    let bytes = match hex::decode(hash_hex) {
        Ok(b) => b,
        Err(_) => return 0,
    };
    let mut bits = 0;
    for byte in bytes {
        if byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
