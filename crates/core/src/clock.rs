//! Lamport logical clock and injectable wall-clock source.
//!
//! The logical clock orders ledger entries and trust events. Its counter is
//! strictly increasing for every call on one node, and merging a remote
//! timestamp always lands strictly after it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A Lamport timestamp. Totally ordered by `(counter, node_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalTimestamp {
    counter: u64,
    node_id: String,
}

impl LogicalTimestamp {
    /// Build a timestamp. Normally only the clock issues these.
    pub fn new(counter: u64, node_id: impl Into<String>) -> Self {
        Self {
            counter,
            node_id: node_id.into(),
        }
    }

    /// Counter component
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Issuing node
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl Ord for LogicalTimestamp {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.counter
            .cmp(&other.counter)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for LogicalTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LogicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.node_id)
    }
}

/// Lamport counter for one node. Safe to share across threads.
#[derive(Debug)]
pub struct LogicalClock {
    node_id: String,
    counter: AtomicU64,
}

impl LogicalClock {
    /// Create a clock starting at zero
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Node this clock belongs to
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Current counter value without advancing
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Advance the counter by one and issue a timestamp.
    pub fn tick(&self) -> LogicalTimestamp {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        LogicalTimestamp::new(counter, self.node_id.clone())
    }

    /// Merge a remote timestamp: `counter = max(local, remote) + 1`.
    pub fn merge(&self, remote: &LogicalTimestamp) -> LogicalTimestamp {
        let mut current = self.counter.load(Ordering::SeqCst);
        loop {
            let next = current.max(remote.counter) + 1;
            match self.counter.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return LogicalTimestamp::new(next, self.node_id.clone()),
                Err(observed) => current = observed,
            }
        }
    }

    /// Fast-forward to a persisted counter on startup. Never moves backwards.
    pub fn restore(&self, counter: u64) {
        self.counter.fetch_max(counter, Ordering::SeqCst);
    }
}

/// Wall-clock source, injectable so periodic components replay deterministically.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;
}

/// System wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicU64,
}

impl ManualTimeSource {
    /// Start at the given instant
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute instant
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
