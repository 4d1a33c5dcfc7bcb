//! Priority dispatcher.
//!
//! Bounded outbound queue ordered by QoS tier, then sender reputation, then
//! age. Each dispatch tick drains a batch, sends it with limited
//! concurrency and re-queues failures until they run out of attempts.
//! Ledger sync frames in a batch go out one after another in queue order,
//! so block pushes to a peer arrive in index order.

use crate::envelope::QosTier;
use crate::error::DispatchError;
use crate::multipath::{fan_out, FanOutResult};
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use offmesh_core::capability::Transport;
use offmesh_core::config::DispatcherConfig;
use offmesh_core::error::TransportError;
use offmesh_core::types::PeerId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// What an outbound frame carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    /// Application envelopes, originated here or relayed
    Traffic,
    /// Ledger inventories and block pushes
    LedgerSync,
}

/// Bytes to send and the direct neighbours to send them to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub hops: Vec<PeerId>,
    pub bytes: Vec<u8>,
    pub kind: FrameKind,
}

/// One queued send
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedItem {
    pub payload: OutboundFrame,
    pub qos_tier: QosTier,
    /// Reputation of the peer the traffic came from (or our own route score)
    pub reputation_score: f64,
    /// Unix milliseconds
    pub enqueue_time: u64,
    pub attempts: u32,
    /// Short description for logs and reports
    pub label: String,
}

impl QueuedItem {
    pub fn new(
        payload: OutboundFrame,
        qos_tier: QosTier,
        reputation_score: f64,
        enqueue_time: u64,
        label: impl Into<String>,
    ) -> Self {
        Self {
            payload,
            qos_tier,
            reputation_score,
            enqueue_time,
            attempts: 0,
            label: label.into(),
        }
    }
}

/// Ordering key. Smaller keys are dispatched first.
#[derive(Debug, Clone, Copy)]
struct PriorityKey {
    tier: QosTier,
    reputation: f64,
    enqueue_time: u64,
    seq: u64,
}

impl PriorityKey {
    fn of(item: &QueuedItem, seq: u64) -> Self {
        Self {
            tier: item.qos_tier,
            reputation: item.reputation_score,
            enqueue_time: item.enqueue_time,
            seq,
        }
    }
}

impl Ord for PriorityKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .tier
            .cmp(&self.tier)
            .then_with(|| other.reputation.total_cmp(&self.reputation))
            .then_with(|| self.enqueue_time.cmp(&other.enqueue_time))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for PriorityKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PriorityKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PriorityKey {}

/// Per-peer send result, fed back into trust scoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerOutcome {
    pub peer_id: PeerId,
    pub kind: FrameKind,
    pub success: bool,
    pub error: Option<TransportError>,
}

/// What one dispatch tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Labels of items sent to at least one hop
    pub delivered: Vec<String>,
    /// Labels of items re-queued for another attempt
    pub retried: Vec<String>,
    /// Items that ran out of attempts or room
    pub dropped: Vec<QueuedItem>,
    pub peer_outcomes: Vec<PeerOutcome>,
}

impl DispatchReport {
    pub fn is_empty(&self) -> bool {
        self.delivered.is_empty() && self.retried.is_empty() && self.dropped.is_empty()
    }
}

/// Queue depth and running totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub depth_by_tier: BTreeMap<QosTier, usize>,
    pub max_in_flight: usize,
    pub enqueued_total: u64,
    pub delivered_total: u64,
    pub retried_total: u64,
    pub dropped_total: u64,
    pub evicted_total: u64,
    pub rejected_total: u64,
}

/// Bounded, reputation-aware outbound queue
pub struct PriorityDispatcher {
    config: DispatcherConfig,
    queue: BTreeMap<PriorityKey, QueuedItem>,
    next_seq: u64,
    totals: QueueStats,
}

impl PriorityDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            queue: BTreeMap::new(),
            next_seq: 0,
            totals: QueueStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn key_for(&mut self, item: &QueuedItem) -> PriorityKey {
        let key = PriorityKey::of(item, self.next_seq);
        self.next_seq += 1;
        key
    }

    /// Queue an item.
    ///
    /// When full, the lowest queued item is evicted only if it is bulk
    /// traffic and the new item outranks it; otherwise the new item is
    /// refused.
    pub fn enqueue(&mut self, item: QueuedItem) -> Result<(), DispatchError> {
        let key = self.key_for(&item);
        self.insert(key, item)?;
        self.totals.enqueued_total += 1;
        Ok(())
    }

    fn insert(&mut self, key: PriorityKey, item: QueuedItem) -> Result<(), DispatchError> {
        if self.queue.len() >= self.config.capacity {
            let evictable = self
                .queue
                .last_key_value()
                .map(|(worst, _)| worst.tier == QosTier::Bulk && key < *worst)
                .unwrap_or(false);
            if !evictable {
                self.totals.rejected_total += 1;
                debug!(
                    label = %item.label,
                    tier = ?item.qos_tier,
                    capacity = self.config.capacity,
                    "Dispatch queue full, item refused"
                );
                return Err(DispatchError::QueueFull {
                    capacity: self.config.capacity,
                });
            }
            if let Some((_, evicted)) = self.queue.pop_last() {
                self.totals.evicted_total += 1;
                debug!(label = %evicted.label, "Evicted bulk item to make room");
            }
        }
        self.queue.insert(key, item);
        Ok(())
    }

    /// Next item that would be dispatched
    pub fn peek(&self) -> Option<&QueuedItem> {
        self.queue.first_key_value().map(|(_, item)| item)
    }

    /// Remove up to `n` items in priority order
    pub fn drain_batch(&mut self, n: usize) -> Vec<QueuedItem> {
        let mut batch = Vec::with_capacity(n.min(self.queue.len()));
        while batch.len() < n {
            match self.queue.pop_first() {
                Some((_, item)) => batch.push(item),
                None => break,
            }
        }
        batch
    }

    /// Send one batch.
    pub async fn tick(&mut self, transport: &dyn Transport) -> DispatchReport {
        let batch = self.drain_batch(self.config.batch_size);
        let mut report = DispatchReport::default();
        if batch.is_empty() {
            return report;
        }

        let (sync, traffic): (Vec<QueuedItem>, Vec<QueuedItem>) = batch
            .into_iter()
            .partition(|item| item.payload.kind == FrameKind::LedgerSync);

        let in_order = async move {
            let mut sent = Vec::with_capacity(sync.len());
            for item in sync {
                let result = fan_out(transport, &item.payload.hops, &item.payload.bytes).await;
                sent.push((item, result));
            }
            sent
        };
        let concurrent = stream::iter(traffic)
            .map(|item| async move {
                let result = fan_out(transport, &item.payload.hops, &item.payload.bytes).await;
                (item, result)
            })
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect::<Vec<(QueuedItem, FanOutResult)>>();
        let (mut results, unordered) = future::join(in_order, concurrent).await;
        results.extend(unordered);

        for (mut item, result) in results {
            let kind = item.payload.kind;
            for peer in &result.succeeded {
                report.peer_outcomes.push(PeerOutcome {
                    peer_id: peer.clone(),
                    kind,
                    success: true,
                    error: None,
                });
            }
            for (peer, err) in &result.failed {
                report.peer_outcomes.push(PeerOutcome {
                    peer_id: peer.clone(),
                    kind,
                    success: false,
                    error: Some(err.clone()),
                });
            }

            if result.is_success() {
                self.totals.delivered_total += 1;
                report.delivered.push(item.label);
                continue;
            }

            item.attempts += 1;
            if item.attempts >= self.config.max_attempts {
                warn!(
                    label = %item.label,
                    attempts = item.attempts,
                    hops = ?item.payload.hops,
                    "Dropping item after exhausting send attempts"
                );
                self.totals.dropped_total += 1;
                report.dropped.push(item);
                continue;
            }

            let label = item.label.clone();
            let key = self.key_for(&item);
            match self.insert(key, item.clone()) {
                Ok(()) => {
                    self.totals.retried_total += 1;
                    report.retried.push(label);
                }
                Err(_) => {
                    self.totals.dropped_total += 1;
                    report.dropped.push(item);
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            retried = report.retried.len(),
            dropped = report.dropped.len(),
            depth = self.queue.len(),
            "Dispatch tick complete"
        );
        report
    }

    /// Depth per tier plus running totals
    pub fn stats(&self) -> QueueStats {
        let mut depth_by_tier: BTreeMap<QosTier, usize> =
            QosTier::ALL.iter().map(|tier| (*tier, 0)).collect();
        for key in self.queue.keys() {
            *depth_by_tier.entry(key.tier).or_insert(0) += 1;
        }
        QueueStats {
            depth: self.queue.len(),
            capacity: self.config.capacity,
            depth_by_tier,
            max_in_flight: self.config.max_in_flight,
            ..self.totals.clone()
        }
    }

    /// Drop everything queued, returning how many items were discarded
    pub fn clear(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }

    /// Items queued per destination peer
    pub fn pending_by_peer(&self) -> HashMap<PeerId, usize> {
        let mut counts = HashMap::new();
        for item in self.queue.values() {
            for hop in &item.payload.hops {
                *counts.entry(hop.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}
