//! Trust Scoring Module
//!
//! Tracks a reputation score in [0, 1] for every peer the node has dealt
//! with. Scores are driven by relay and ledger evidence, bias routing and
//! dispatch, and never fail to read: an unseen peer is neutral.
//!
//! Blacklisting is independent from the score. A run of consecutive failures
//! flags the peer for a fixed period, even if its score is still decent.

use offmesh_core::clock::{LogicalClock, LogicalTimestamp, TimeSource};
use offmesh_core::config::TrustConfig;
use offmesh_core::types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Evidence about a peer's behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustEvent {
    /// A frame relayed through the peer was delivered
    RelaySuccess,
    /// A send to or through the peer failed
    RelayFailure,
    /// The link to the peer is slow
    HighLatency { latency_ms: u64 },
    /// The peer delivered an entry with a bad signature
    InvalidSignature,
    /// The peer delivered an entry spending an already spent output
    DoubleSpendAttempt,
    /// A well-reputed peer rebroadcast useful data
    HighReputationRebroadcast,
}

impl TrustEvent {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            TrustEvent::RelayFailure | TrustEvent::InvalidSignature | TrustEvent::DoubleSpendAttempt
        )
    }

    fn is_success(&self) -> bool {
        matches!(
            self,
            TrustEvent::RelaySuccess | TrustEvent::HighReputationRebroadcast
        )
    }
}

/// Trust score for a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    pub peer_id: PeerId,
    /// Score as stored at `last_updated`, before decay
    pub score: f64,
    /// Unix milliseconds of the last change
    pub last_updated: u64,
    pub consecutive_failures: u32,
    /// Blacklist expiry, Unix milliseconds
    pub blacklisted_until: Option<u64>,
    /// Logical time of the last recorded event
    pub last_event: Option<LogicalTimestamp>,
}

impl TrustScore {
    fn neutral(peer_id: &str, neutral: f64, now_ms: u64) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            score: neutral,
            last_updated: now_ms,
            consecutive_failures: 0,
            blacklisted_until: None,
            last_event: None,
        }
    }
}

/// Best and worst peers by current score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerRanking {
    /// Highest scores first
    pub top: Vec<(PeerId, f64)>,
    /// Lowest scores first
    pub worst: Vec<(PeerId, f64)>,
}

/// Thread-safe reputation table
pub struct TrustRegistry {
    config: TrustConfig,
    clock: Arc<LogicalClock>,
    time: Arc<dyn TimeSource>,
    scores: RwLock<HashMap<PeerId, TrustScore>>,
}

impl TrustRegistry {
    pub fn new(config: TrustConfig, clock: Arc<LogicalClock>, time: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            clock,
            time,
            scores: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PeerId, TrustScore>> {
        self.scores.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PeerId, TrustScore>> {
        self.scores.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Score after lazy decay toward neutral
    fn effective(&self, stored: &TrustScore, now_ms: u64) -> f64 {
        let decay = &self.config.decay;
        if !decay.enabled || decay.half_life_ms == 0 {
            return stored.score;
        }
        let elapsed = now_ms.saturating_sub(stored.last_updated) as f64;
        let factor = 0.5_f64.powf(elapsed / decay.half_life_ms as f64);
        let neutral = self.config.neutral_score;
        (neutral + (stored.score - neutral) * factor).clamp(0.0, 1.0)
    }

    /// Current score; neutral for unseen peers
    pub fn get_score(&self, peer_id: &str) -> f64 {
        let now = self.time.now_ms();
        self.read()
            .get(peer_id)
            .map(|s| self.effective(s, now))
            .unwrap_or(self.config.neutral_score)
    }

    /// Whether the peer is inside a blacklist window
    pub fn is_blacklisted(&self, peer_id: &str) -> bool {
        let now = self.time.now_ms();
        self.read()
            .get(peer_id)
            .and_then(|s| s.blacklisted_until)
            .map(|until| until > now)
            .unwrap_or(false)
    }

    /// Raw record for a peer, if seen
    pub fn get(&self, peer_id: &str) -> Option<TrustScore> {
        self.read().get(peer_id).cloned()
    }

    /// Increase a score by `delta`, clamped to [0, 1]
    pub fn reward(&self, peer_id: &str, delta: f64) -> f64 {
        self.adjust(peer_id, delta.abs())
    }

    /// Decrease a score by `delta`, clamped to [0, 1]
    pub fn penalize(&self, peer_id: &str, delta: f64) -> f64 {
        self.adjust(peer_id, -delta.abs())
    }

    fn adjust(&self, peer_id: &str, delta: f64) -> f64 {
        let now = self.time.now_ms();
        let mut scores = self.write();
        let entry = scores
            .entry(peer_id.to_string())
            .or_insert_with(|| TrustScore::neutral(peer_id, self.config.neutral_score, now));
        let current = self.effective(entry, now);
        entry.score = (current + delta).clamp(0.0, 1.0);
        entry.last_updated = now;
        entry.score
    }

    /// Apply one piece of evidence. Returns the new score.
    pub fn record(&self, peer_id: &str, event: TrustEvent) -> f64 {
        let now = self.time.now_ms();
        let stamp = self.clock.tick();
        let cfg = &self.config;

        let mut scores = self.write();
        let entry = scores
            .entry(peer_id.to_string())
            .or_insert_with(|| TrustScore::neutral(peer_id, cfg.neutral_score, now));
        let current = self.effective(entry, now);

        let delta = match event {
            TrustEvent::RelaySuccess => cfg.relay_success_reward,
            TrustEvent::RelayFailure => -cfg.relay_failure_penalty,
            TrustEvent::HighLatency { latency_ms } => {
                if latency_ms > cfg.high_latency_threshold_ms && current > cfg.latency_penalty_floor {
                    -cfg.high_latency_penalty
                } else {
                    0.0
                }
            }
            TrustEvent::InvalidSignature => -cfg.invalid_signature_penalty,
            TrustEvent::DoubleSpendAttempt => -cfg.double_spend_penalty,
            TrustEvent::HighReputationRebroadcast => {
                if current > cfg.high_reputation_threshold {
                    cfg.rebroadcast_reward
                } else {
                    0.0
                }
            }
        };

        entry.score = (current + delta).clamp(0.0, 1.0);
        entry.last_updated = now;
        entry.last_event = Some(stamp);

        if event.is_success() {
            entry.consecutive_failures = 0;
        } else if event.is_failure() {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
            if entry.consecutive_failures >= cfg.failure_threshold {
                let until = now.saturating_add(cfg.blacklist_duration_ms);
                if entry.blacklisted_until.map_or(true, |u| u <= now) {
                    warn!(
                        peer_id = %peer_id,
                        consecutive_failures = entry.consecutive_failures,
                        until,
                        "Peer blacklisted"
                    );
                }
                entry.blacklisted_until = Some(until);
            }
        }

        debug!(
            peer_id = %peer_id,
            event = ?event,
            score = entry.score,
            "Trust event recorded"
        );

        entry.score
    }

    /// The `n` best and `n` worst peers by current score
    pub fn get_top_and_worst_peers(&self, n: usize) -> PeerRanking {
        let now = self.time.now_ms();
        let mut ranked: Vec<(PeerId, f64)> = self
            .read()
            .values()
            .map(|s| (s.peer_id.clone(), self.effective(s, now)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let top = ranked.iter().take(n).cloned().collect();
        let worst = ranked.iter().rev().take(n).cloned().collect();
        PeerRanking { top, worst }
    }

    /// Every record, for persistence
    pub fn snapshot(&self) -> Vec<TrustScore> {
        let mut all: Vec<TrustScore> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        all
    }

    /// Load persisted records, replacing any in memory for the same peers.
    pub fn restore(&self, records: impl IntoIterator<Item = TrustScore>) {
        let mut scores = self.write();
        let mut restored = 0usize;
        for mut record in records {
            record.score = record.score.clamp(0.0, 1.0);
            if let Some(stamp) = &record.last_event {
                self.clock.restore(stamp.counter());
            }
            scores.insert(record.peer_id.clone(), record);
            restored += 1;
        }
        info!(restored, "Trust scores restored");
    }

    /// Number of peers tracked
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
