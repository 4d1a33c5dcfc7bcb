//! In-memory transport for simulations and tests.
//!
//! A [`MemoryNetwork`] is a hub of named nodes joined by symmetric links.
//! Each registered node gets a [`MemoryTransport`] and the receiving end of
//! its event channel. Links can be cut, made lossy or given a latency.

use async_trait::async_trait;
use offmesh_core::capability::{Transport, TransportEvent};
use offmesh_core::error::TransportError;
use offmesh_core::types::PeerId;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Default capacity of each node's event channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

type Link = (PeerId, PeerId);

fn link(a: &str, b: &str) -> Link {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Default)]
struct NetworkState {
    inboxes: HashMap<PeerId, mpsc::Sender<TransportEvent>>,
    links: BTreeSet<Link>,
    lossy: HashSet<Link>,
    latency_ms: HashMap<Link, u64>,
    offline: HashSet<PeerId>,
}

impl NetworkState {
    fn push(&self, to: &str, event: TransportEvent) -> bool {
        match self.inboxes.get(to) {
            Some(inbox) => inbox.try_send(event).is_ok(),
            None => false,
        }
    }

    fn link_up(&mut self, a: &str, b: &str) -> bool {
        if a == b || !self.inboxes.contains_key(a) || !self.inboxes.contains_key(b) {
            return false;
        }
        if !self.links.insert(link(a, b)) {
            return true;
        }
        self.push(a, TransportEvent::PeerDiscovered { peer_id: b.to_string() });
        self.push(b, TransportEvent::PeerDiscovered { peer_id: a.to_string() });
        true
    }

    fn link_down(&mut self, a: &str, b: &str) {
        if self.links.remove(&link(a, b)) {
            self.push(a, TransportEvent::PeerDropped { peer_id: b.to_string() });
            self.push(b, TransportEvent::PeerDropped { peer_id: a.to_string() });
        }
    }

    fn neighbours(&self, node: &str) -> Vec<PeerId> {
        self.links
            .iter()
            .filter_map(|(a, b)| {
                if a == node {
                    Some(b.clone())
                } else if b == node {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Shared hub connecting in-memory transports
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    capacity: usize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState::default())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Add a node, returning its transport and event stream
    pub fn register(
        &self,
        node_id: impl Into<PeerId>,
    ) -> (MemoryTransport, mpsc::Receiver<TransportEvent>) {
        let node_id = node_id.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().inboxes.insert(node_id.clone(), tx);
        debug!(node_id = %node_id, "Node joined memory network");
        (
            MemoryTransport {
                node_id,
                network: self.clone(),
            },
            rx,
        )
    }

    /// Bring up a link; both ends see `PeerDiscovered`
    pub fn connect(&self, a: &str, b: &str) -> bool {
        self.lock().link_up(a, b)
    }

    /// Cut a link; both ends see `PeerDropped`
    pub fn disconnect(&self, a: &str, b: &str) {
        self.lock().link_down(a, b);
    }

    /// Take a node off the air, cutting all its links
    pub fn set_offline(&self, node: &str, offline: bool) {
        let mut state = self.lock();
        if offline {
            state.offline.insert(node.to_string());
            for peer in state.neighbours(node) {
                state.link_down(node, &peer);
            }
        } else {
            state.offline.remove(node);
        }
    }

    /// Make sends across a link fail without dropping it
    pub fn set_lossy(&self, a: &str, b: &str, lossy: bool) {
        let mut state = self.lock();
        if lossy {
            state.lossy.insert(link(a, b));
        } else {
            state.lossy.remove(&link(a, b));
        }
    }

    /// Record a measured latency for a link
    pub fn set_latency(&self, a: &str, b: &str, latency_ms: u64) {
        self.lock().latency_ms.insert(link(a, b), latency_ms);
    }

    pub fn is_connected(&self, a: &str, b: &str) -> bool {
        self.lock().links.contains(&link(a, b))
    }

    pub fn neighbours(&self, node: &str) -> Vec<PeerId> {
        self.lock().neighbours(node)
    }
}

/// One node's view of a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    node_id: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, peer_id: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let state = self.network.lock();
        let key = link(&self.node_id, peer_id);
        if !state.links.contains(&key) {
            return Err(TransportError::NotConnected {
                peer_id: peer_id.to_string(),
            });
        }
        if state.lossy.contains(&key) {
            return Err(TransportError::SendFailed {
                peer_id: peer_id.to_string(),
                reason: "link lossy".to_string(),
            });
        }
        let delivered = state.push(
            peer_id,
            TransportEvent::Frame {
                from: self.node_id.clone(),
                bytes,
            },
        );
        if !delivered {
            return Err(TransportError::SendFailed {
                peer_id: peer_id.to_string(),
                reason: "inbox full or closed".to_string(),
            });
        }
        trace!(from = %self.node_id, to = %peer_id, "Frame delivered");
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.network.neighbours(&self.node_id)
    }

    fn link_latency_ms(&self, peer_id: &str) -> Option<u64> {
        self.network
            .lock()
            .latency_ms
            .get(&link(&self.node_id, peer_id))
            .copied()
    }

    async fn reconnect(&self, peer_id: &str) -> bool {
        let mut state = self.network.lock();
        if state.offline.contains(peer_id) || state.offline.contains(&self.node_id) {
            return false;
        }
        state.link_up(&self.node_id, peer_id)
    }

    async fn discover_peers(&self, count: usize) -> Vec<PeerId> {
        let mut state = self.network.lock();
        if state.offline.contains(&self.node_id) {
            return Vec::new();
        }
        let current: HashSet<PeerId> = state.neighbours(&self.node_id).into_iter().collect();
        let mut candidates: Vec<PeerId> = state
            .inboxes
            .keys()
            .filter(|p| **p != self.node_id && !current.contains(*p) && !state.offline.contains(*p))
            .cloned()
            .collect();
        candidates.sort();
        candidates.truncate(count);

        let mut found = Vec::new();
        for peer in candidates {
            if state.link_up(&self.node_id, &peer) {
                found.push(peer);
            }
        }
        found
    }
}
