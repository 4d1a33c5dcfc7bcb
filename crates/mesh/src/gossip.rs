//! Ledger gossip - inventory exchange and block push.
//!
//! Nodes advertise their ledger head with `LedgerInventory`. A node holding
//! entries the remote lacks pushes every one of them as `BlockData`, in
//! ascending order. A node that finds the remote ahead answers with its own
//! inventory so the remote does the pushing. Equal heads produce nothing,
//! which keeps the exchange from ping-ponging.

use crate::envelope::WireMessage;
use offmesh_core::entry::LedgerEntry;
use offmesh_core::error::{ConflictError, ValidationError};
use offmesh_core::ledger::LedgerStore;
use offmesh_core::types::PeerId;
use offmesh_trust_mesh::{TrustEvent, TrustRegistry};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Result of applying one pushed block
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    /// Appended to the local ledger
    Accepted(LedgerEntry),
    /// Already at or below the local head
    Stale { index: u64, head: u64 },
    /// Ahead of head + 1; not buffered, the sender re-pushes in order
    Gap { index: u64, expected: u64 },
    /// Extends a different chain; held for reconciliation
    Conflict(ConflictError),
    /// Failed validation
    Rejected(ValidationError),
}

/// Gossip counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStats {
    pub inventories_sent: u64,
    pub inventories_received: u64,
    pub blocks_pushed: u64,
    pub blocks_accepted: u64,
    pub blocks_ignored: u64,
    pub blocks_rejected: u64,
    pub conflicts: u64,
}

/// Anti-entropy driver for one node's ledger
#[derive(Debug)]
pub struct GossipSync {
    node_id: PeerId,
    stats: GossipStats,
}

impl GossipSync {
    pub fn new(node_id: impl Into<PeerId>) -> Self {
        Self {
            node_id: node_id.into(),
            stats: GossipStats::default(),
        }
    }

    /// Current head advertisement
    pub fn inventory(&self, ledger: &LedgerStore) -> WireMessage {
        WireMessage::LedgerInventory {
            last_index: ledger.head_index(),
            head_hash: ledger.head_hash().map(str::to_string),
        }
    }

    /// Greet a newly linked peer with our inventory
    pub fn on_peer_discovered(&mut self, peer_id: &str, ledger: &LedgerStore) -> WireMessage {
        debug!(node_id = %self.node_id, peer_id = %peer_id, head = ledger.head_index(), "Sending inventory to new peer");
        self.stats.inventories_sent += 1;
        self.inventory(ledger)
    }

    /// React to a remote inventory.
    ///
    /// Returns the frames to send back to `from`.
    pub fn on_inventory(
        &mut self,
        from: &str,
        last_index: u64,
        head_hash: Option<&str>,
        ledger: &LedgerStore,
    ) -> Vec<WireMessage> {
        self.stats.inventories_received += 1;
        let local = ledger.head_index();

        if local > last_index {
            let missing: Vec<WireMessage> = ledger
                .entries_after(last_index)
                .iter()
                .map(|entry| WireMessage::BlockData {
                    index: entry.sequence_number,
                    entry: entry.clone(),
                })
                .collect();
            debug!(
                node_id = %self.node_id,
                peer_id = %from,
                remote_index = last_index,
                local_index = local,
                pushing = missing.len(),
                "Peer is behind; pushing entries"
            );
            self.stats.blocks_pushed += missing.len() as u64;
            return missing;
        }

        if local < last_index {
            debug!(
                node_id = %self.node_id,
                peer_id = %from,
                remote_index = last_index,
                local_index = local,
                "Peer is ahead; requesting push"
            );
            self.stats.inventories_sent += 1;
            return vec![self.inventory(ledger)];
        }

        if head_hash != ledger.head_hash() {
            warn!(
                node_id = %self.node_id,
                peer_id = %from,
                index = local,
                local_head = ?ledger.head_hash(),
                remote_head = ?head_hash,
                "Head hash differs at equal height"
            );
        }
        Vec::new()
    }

    /// Apply a pushed block.
    ///
    /// Only `head + 1` is considered. Validation failures that prove
    /// misbehaviour are fed into the sender's trust score.
    pub fn on_block_data(
        &mut self,
        from: &str,
        index: u64,
        entry: LedgerEntry,
        ledger: &mut LedgerStore,
        trust: &TrustRegistry,
    ) -> BlockOutcome {
        let head = ledger.head_index();
        if index != entry.sequence_number {
            let err = ValidationError::SequenceGap {
                expected: index,
                actual: entry.sequence_number,
            };
            warn!(node_id = %self.node_id, peer_id = %from, error = %err, "Block index disagrees with entry");
            self.stats.blocks_rejected += 1;
            return BlockOutcome::Rejected(err);
        }
        if index <= head {
            self.stats.blocks_ignored += 1;
            return BlockOutcome::Stale { index, head };
        }
        if index > head + 1 {
            debug!(node_id = %self.node_id, peer_id = %from, index, expected = head + 1, "Ignoring out-of-order block");
            self.stats.blocks_ignored += 1;
            return BlockOutcome::Gap {
                index,
                expected: head + 1,
            };
        }

        let mut merge = ledger.merge_remote_chain(vec![entry], from);
        if let Some(conflict) = merge.fork.take() {
            if !merge.fork_already_held {
                self.stats.conflicts += 1;
            }
            return BlockOutcome::Conflict(conflict);
        }
        if let Some(err) = merge.rejected.take() {
            self.stats.blocks_rejected += 1;
            match err {
                ValidationError::InvalidSignature { .. } => {
                    trust.record(from, TrustEvent::InvalidSignature);
                }
                ValidationError::DoubleSpend { .. } => {
                    trust.record(from, TrustEvent::DoubleSpendAttempt);
                }
                _ => {}
            }
            return BlockOutcome::Rejected(err);
        }
        match merge.accepted.pop() {
            Some(accepted) => {
                self.stats.blocks_accepted += 1;
                trust.record(from, TrustEvent::HighReputationRebroadcast);
                BlockOutcome::Accepted(accepted)
            }
            None => {
                self.stats.blocks_ignored += 1;
                BlockOutcome::Stale {
                    index,
                    head: ledger.head_index(),
                }
            }
        }
    }

    /// Periodic anti-entropy: one inventory per connected peer
    pub fn cycle(&mut self, connected: &[PeerId], ledger: &LedgerStore) -> Vec<(PeerId, WireMessage)> {
        let inventory = self.inventory(ledger);
        self.stats.inventories_sent += connected.len() as u64;
        connected
            .iter()
            .map(|peer| (peer.clone(), inventory.clone()))
            .collect()
    }

    pub fn stats(&self) -> &GossipStats {
        &self.stats
    }
}
