//! Multi-hop router.
//!
//! TTL-bounded store-and-forward relaying with duplicate and loop
//! suppression. The router is a pure decision engine: it never sends, it
//! tells the node what to deliver and where to relay.

use crate::envelope::{MeshMessageEnvelope, QosTier};
use lru::LruCache;
use offmesh_core::config::RouterConfig;
use offmesh_core::types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use tracing::debug;

/// Why an envelope was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Id already seen
    Duplicate,
    /// Arrived with no hop budget left
    TtlExpired,
    /// Arrived with more hop budget than the mesh allows
    TtlExceeded,
    /// Visited list names the same node twice
    Malformed,
    /// This node is already in the visited list
    Loop,
    /// Hop budget ran out at this node
    HopLimit,
    /// Nobody left to relay to
    NoRelayPeers,
}

/// What to do with a received envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Hand the envelope to the local application
    Deliver(MeshMessageEnvelope),
    /// Forward the updated envelope to these peers
    Relay {
        envelope: MeshMessageEnvelope,
        peers: Vec<PeerId>,
    },
    /// Discard
    Drop(DropReason),
}

/// Router counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub originated: u64,
    pub delivered: u64,
    pub relayed: u64,
    pub dropped_duplicate: u64,
    pub dropped_ttl: u64,
    pub dropped_loop: u64,
    pub dropped_no_peers: u64,
    pub dropped_malformed: u64,
}

/// TTL-bounded relay engine for one node
pub struct MultiHopRouter {
    node_id: PeerId,
    max_hops: u8,
    seen: LruCache<String, ()>,
    stats: RouterStats,
}

impl MultiHopRouter {
    pub fn new(node_id: impl Into<PeerId>, config: &RouterConfig) -> Self {
        let capacity = NonZeroUsize::new(config.dedupe_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            node_id: node_id.into(),
            max_hops: config.max_hops.max(1),
            seen: LruCache::new(capacity),
            stats: RouterStats::default(),
        }
    }

    /// Build a new envelope originating here.
    ///
    /// The id is recorded as seen so echoes from neighbours are dropped.
    pub fn originate(
        &mut self,
        content: Vec<u8>,
        target: Option<PeerId>,
        ttl: u8,
        qos: QosTier,
        metadata: BTreeMap<String, String>,
    ) -> MeshMessageEnvelope {
        let envelope = MeshMessageEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            ttl: ttl.clamp(1, self.max_hops),
            origin_node_id: self.node_id.clone(),
            visited_nodes: vec![self.node_id.clone()],
            target_peer_id: target,
            metadata,
            qos,
        };
        self.seen.put(envelope.id.clone(), ());
        self.stats.originated += 1;
        envelope
    }

    /// Decide what to do with an envelope received from `from_peer`.
    pub fn on_receive(
        &mut self,
        mut envelope: MeshMessageEnvelope,
        from_peer: &str,
        connected: &[PeerId],
    ) -> RouteDecision {
        if self.seen.contains(&envelope.id) {
            self.stats.dropped_duplicate += 1;
            return self.drop_envelope(&envelope, from_peer, DropReason::Duplicate);
        }
        self.seen.put(envelope.id.clone(), ());

        if envelope.ttl == 0 {
            self.stats.dropped_ttl += 1;
            return self.drop_envelope(&envelope, from_peer, DropReason::TtlExpired);
        }
        if envelope.ttl > self.max_hops {
            self.stats.dropped_ttl += 1;
            return self.drop_envelope(&envelope, from_peer, DropReason::TtlExceeded);
        }
        if envelope.has_repeated_visits() {
            self.stats.dropped_malformed += 1;
            return self.drop_envelope(&envelope, from_peer, DropReason::Malformed);
        }
        if envelope.has_visited(&self.node_id) {
            self.stats.dropped_loop += 1;
            return self.drop_envelope(&envelope, from_peer, DropReason::Loop);
        }

        let for_us = match &envelope.target_peer_id {
            None => true,
            Some(target) => *target == self.node_id,
        };
        if for_us {
            self.stats.delivered += 1;
            debug!(
                node_id = %self.node_id,
                message_id = %envelope.id,
                origin = %envelope.origin_node_id,
                "Delivering envelope"
            );
            return RouteDecision::Deliver(envelope);
        }

        envelope.ttl -= 1;
        if envelope.ttl == 0 {
            self.stats.dropped_ttl += 1;
            return self.drop_envelope(&envelope, from_peer, DropReason::HopLimit);
        }

        let peers: Vec<PeerId> = connected
            .iter()
            .filter(|p| p.as_str() != from_peer && !envelope.has_visited(p))
            .cloned()
            .collect();
        if peers.is_empty() {
            self.stats.dropped_no_peers += 1;
            return self.drop_envelope(&envelope, from_peer, DropReason::NoRelayPeers);
        }

        envelope.mark_visited(&self.node_id);
        self.stats.relayed += 1;
        debug!(
            node_id = %self.node_id,
            message_id = %envelope.id,
            ttl = envelope.ttl,
            relay_to = peers.len(),
            "Relaying envelope"
        );
        RouteDecision::Relay { envelope, peers }
    }

    fn drop_envelope(
        &self,
        envelope: &MeshMessageEnvelope,
        from_peer: &str,
        reason: DropReason,
    ) -> RouteDecision {
        debug!(
            node_id = %self.node_id,
            message_id = %envelope.id,
            peer_id = %from_peer,
            reason = ?reason,
            "Dropping envelope"
        );
        RouteDecision::Drop(reason)
    }

    /// Whether an id is in the dedupe cache
    pub fn has_seen(&self, message_id: &str) -> bool {
        self.seen.contains(message_id)
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    pub fn max_hops(&self) -> u8 {
        self.max_hops
    }
}
