//! SQLite-backed persistent store.
//!
//! Two tables: `ledger_entries` is append-only, one row per accepted entry
//! keyed by sequence number; `trust_scores` holds the latest row per peer.
//! Rows carry the full record as JSON next to the indexed columns.

use crate::store::PersistentStore;
use offmesh_core::entry::LedgerEntry;
use offmesh_core::error::StoreError;
use offmesh_trust_mesh::TrustScore;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn corrupt(err: serde_json::Error) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

/// Durable store in a single SQLite file
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = Connection::open(path.as_ref()).map_err(backend)?;
        info!(path = %path.as_ref().display(), "Opened SQLite store");
        Self::init(db)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(db: Connection) -> Result<Self, StoreError> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS ledger_entries (
                sequence_number INTEGER PRIMARY KEY,
                entry_id TEXT NOT NULL,
                entry_hash TEXT NOT NULL UNIQUE,
                sender_id TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )
        .map_err(backend)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS trust_scores (
                peer_id TEXT PRIMARY KEY,
                score REAL NOT NULL,
                last_updated INTEGER NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )
        .map_err(backend)?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_ledger_sender ON ledger_entries(sender_id)",
            [],
        )
        .map_err(backend)?;

        Ok(Self { db: Mutex::new(db) })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Highest stored sequence number
    pub fn latest_index(&self) -> Result<Option<u64>, StoreError> {
        let max: Option<i64> = self
            .lock()
            .query_row("SELECT MAX(sequence_number) FROM ledger_entries", [], |row| {
                row.get(0)
            })
            .map_err(backend)?;
        Ok(max.map(|m| m as u64))
    }
}

impl PersistentStore for SqliteStore {
    fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let payload = serde_json::to_string(entry).map_err(corrupt)?;
        self.lock()
            .execute(
                "INSERT INTO ledger_entries (sequence_number, entry_id, entry_hash, sender_id, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.sequence_number as i64,
                    entry.entry_id,
                    entry.entry_hash,
                    entry.sender_id,
                    payload
                ],
            )
            .map_err(backend)?;
        debug!(index = entry.sequence_number, entry_id = %entry.entry_id, "Persisted ledger entry");
        Ok(())
    }

    fn save_trust(&self, scores: &[TrustScore]) -> Result<(), StoreError> {
        let mut db = self.lock();
        let tx = db.transaction().map_err(backend)?;
        tx.execute("DELETE FROM trust_scores", []).map_err(backend)?;
        for score in scores {
            let payload = serde_json::to_string(score).map_err(corrupt)?;
            tx.execute(
                "INSERT INTO trust_scores (peer_id, score, last_updated, payload) VALUES (?1, ?2, ?3, ?4)",
                params![score.peer_id, score.score, score.last_updated as i64, payload],
            )
            .map_err(backend)?;
        }
        tx.commit().map_err(backend)?;
        Ok(())
    }

    fn load_entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let db = self.lock();
        let mut stmt = db
            .prepare("SELECT payload FROM ledger_entries ORDER BY sequence_number")
            .map_err(backend)?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(corrupt))
            .collect()
    }

    fn load_trust(&self) -> Result<Vec<TrustScore>, StoreError> {
        let db = self.lock();
        let mut stmt = db
            .prepare("SELECT payload FROM trust_scores ORDER BY peer_id")
            .map_err(backend)?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(corrupt))
            .collect()
    }
}
