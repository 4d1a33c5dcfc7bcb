//! Persistent store capability.
//!
//! Accepted ledger entries are appended as they are accepted; trust scores
//! are saved as a whole table. On startup both are loaded back and replayed.

use offmesh_core::entry::LedgerEntry;
use offmesh_core::error::StoreError;
use offmesh_trust_mesh::TrustScore;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Durable storage for ledger entries and trust scores
pub trait PersistentStore: Send + Sync {
    /// Append one accepted entry
    fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    /// Replace the stored trust table
    fn save_trust(&self, scores: &[TrustScore]) -> Result<(), StoreError>;

    /// Every stored entry, ascending by sequence number
    fn load_entries(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    fn load_trust(&self) -> Result<Vec<TrustScore>, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<u64, LedgerEntry>,
    trust: BTreeMap<String, TrustScore>,
}

/// Volatile store for tests and nodes without a data directory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }
}

impl PersistentStore for MemoryStore {
    fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.entries.contains_key(&entry.sequence_number) {
            return Err(StoreError::Backend(format!(
                "entry {} already stored",
                entry.sequence_number
            )));
        }
        state.entries.insert(entry.sequence_number, entry.clone());
        Ok(())
    }

    fn save_trust(&self, scores: &[TrustScore]) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.trust = scores
            .iter()
            .map(|s| (s.peer_id.clone(), s.clone()))
            .collect();
        Ok(())
    }

    fn load_entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self.lock().entries.values().cloned().collect())
    }

    fn load_trust(&self) -> Result<Vec<TrustScore>, StoreError> {
        Ok(self.lock().trust.values().cloned().collect())
    }
}
