//! Mesh envelope and wire protocol.
//!
//! [`WireMessage`] is the only thing that crosses a link. It is encoded as
//! tagged JSON so frames stay inspectable in logs and captures.

use crate::error::MeshResult;
use offmesh_core::entry::LedgerEntry;
use offmesh_core::types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Quality-of-service tier, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QosTier {
    /// Background transfers
    Bulk,
    /// Ledger synchronisation
    Sync,
    /// Interactive traffic
    Realtime,
    /// Must go out first
    Critical,
}

impl QosTier {
    /// Every tier, lowest first
    pub const ALL: [QosTier; 4] = [
        QosTier::Bulk,
        QosTier::Sync,
        QosTier::Realtime,
        QosTier::Critical,
    ];
}

/// Application message carried across the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshMessageEnvelope {
    /// Unique message id, used for deduplication
    pub id: String,
    /// Opaque payload
    pub content: Vec<u8>,
    /// Remaining hop budget
    pub ttl: u8,
    /// Node that originated the message
    pub origin_node_id: PeerId,
    /// Nodes that have handled the message, in order, without repeats
    pub visited_nodes: Vec<PeerId>,
    /// Final recipient; `None` means every node that receives it
    pub target_peer_id: Option<PeerId>,
    pub metadata: BTreeMap<String, String>,
    pub qos: QosTier,
}

impl MeshMessageEnvelope {
    /// Whether `node_id` already handled this envelope
    pub fn has_visited(&self, node_id: &str) -> bool {
        self.visited_nodes.iter().any(|n| n == node_id)
    }

    /// Whether any node appears more than once in the visited list
    pub fn has_repeated_visits(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.visited_nodes.len());
        !self.visited_nodes.iter().all(|n| seen.insert(n.as_str()))
    }

    /// Append a node to the visited list, keeping it free of repeats
    pub fn mark_visited(&mut self, node_id: &str) {
        if !self.has_visited(node_id) {
            self.visited_nodes.push(node_id.to_string());
        }
    }
}

/// Frame exchanged between directly connected nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Routed application message
    Mesh(MeshMessageEnvelope),
    /// Ledger head advertisement
    LedgerInventory {
        last_index: u64,
        head_hash: Option<String>,
    },
    /// One ledger entry pushed to a peer that lacks it
    BlockData { index: u64, entry: LedgerEntry },
}

impl WireMessage {
    /// Encode for the transport
    pub fn encode(&self) -> MeshResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a received frame
    pub fn decode(bytes: &[u8]) -> MeshResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Short label for logs and queue items
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Mesh(_) => "mesh",
            WireMessage::LedgerInventory { .. } => "ledger_inventory",
            WireMessage::BlockData { .. } => "block_data",
        }
    }
}
