//! OffMesh Mesh - Store-and-Forward Routing for Infrastructure-less Networks
//!
//! Multi-hop messaging and ledger propagation between peers that only ever
//! talk to their direct neighbours.
//!
//! # Core Components
//!
//! - **Router**: TTL-bounded relaying with duplicate and loop suppression
//! - **Dispatcher**: bounded outbound queue ordered by QoS tier and reputation
//! - **Multi-path**: trust-filtered top-K route selection and concurrent fan-out
//! - **Gossip**: ledger inventory exchange and in-order block push
//! - **Persistence**: SQLite store for accepted entries and trust scores
//! - **Node**: the context owning all of the above plus the periodic scheduler
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use offmesh_core::MeshConfig;
//! use offmesh_crypto::MeshCrypto;
//! use offmesh_mesh::{MemoryNetwork, MeshNode, QosTier};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let network = MemoryNetwork::new();
//! let (transport, _events) = network.register("node-1");
//!
//! let mut node = MeshNode::builder(MeshConfig::for_node("node-1"))
//!     .crypto(Arc::new(MeshCrypto::new()))
//!     .transport(Arc::new(transport))
//!     .build()?;
//!
//! let outcome = node.send_message(b"hello".to_vec(), None, QosTier::Realtime, BTreeMap::new());
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod gossip;
pub mod multipath;
pub mod node;
pub mod observers;
pub mod router;
pub mod scheduler;
pub mod sqlite;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use dispatcher::{
    DispatchReport, FrameKind, OutboundFrame, PeerOutcome, PriorityDispatcher, QueueStats, QueuedItem,
};
pub use envelope::{MeshMessageEnvelope, QosTier, WireMessage};
pub use error::{DispatchError, MeshError, MeshResult};
pub use gossip::{BlockOutcome, GossipStats, GossipSync};
pub use multipath::{
    fan_out, FanOutResult, MultiPathSelector, RouteCandidate, RouteDiscovery, StaticRouteDiscovery,
};
pub use node::{DeliveredMessage, MeshNode, MeshNodeBuilder, TickReport};
pub use observers::{Observers, Subscription};
pub use router::{DropReason, MultiHopRouter, RouteDecision, RouterStats};
pub use scheduler::{Scheduler, TaskKind};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, PersistentStore};
pub use transport::{MemoryNetwork, MemoryTransport};
