//! Mesh node - owns every component and runs the event loop.
//!
//! A [`MeshNode`] is built explicitly through [`MeshNodeBuilder`] with its
//! capabilities injected. All state is mutated through `&mut self` from a
//! single task; the trust table and logical clock are the only shared
//! pieces and carry their own synchronisation.
//!
//! Every public operation collapses to an [`Outcome`]: nothing raw crosses
//! the node boundary.

use crate::dispatcher::{
    DispatchReport, FrameKind, OutboundFrame, PriorityDispatcher, QueueStats, QueuedItem,
};
use crate::envelope::{MeshMessageEnvelope, QosTier, WireMessage};
use crate::error::{MeshError, MeshResult};
use crate::gossip::{BlockOutcome, GossipStats, GossipSync};
use crate::multipath::{MultiPathSelector, RouteDiscovery, StaticRouteDiscovery};
use crate::observers::{Observers, Subscription};
use crate::router::{MultiHopRouter, RouteDecision, RouterStats};
use crate::scheduler::{Scheduler, TaskKind};
use crate::store::{MemoryStore, PersistentStore};
use offmesh_core::capability::{CryptoProvider, Transport, TransportEvent};
use offmesh_core::clock::{LogicalClock, SystemTimeSource, TimeSource};
use offmesh_core::config::MeshConfig;
use offmesh_core::entry::LedgerEntry;
use offmesh_core::error::{Outcome, RoutingError};
use offmesh_core::ledger::{LedgerStore, TransferRequest};
use offmesh_core::types::{Amount, PeerId};
use offmesh_trust_mesh::{
    ConnectivitySnapshot, HealAction, HealthMonitor, HealthReport, PeerLink, PeerRanking, TrustEvent,
    TrustRegistry,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Application message handed to delivery observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub message_id: String,
    pub origin_node_id: PeerId,
    /// Direct neighbour the frame arrived from
    pub from_peer: PeerId,
    pub content: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
    pub qos: QosTier,
}

impl DeliveredMessage {
    fn from_envelope(envelope: MeshMessageEnvelope, from_peer: &str) -> Self {
        Self {
            message_id: envelope.id,
            origin_node_id: envelope.origin_node_id,
            from_peer: from_peer.to_string(),
            content: envelope.content,
            metadata: envelope.metadata,
            qos: envelope.qos,
        }
    }
}

/// What one scheduler tick ran
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub ran: Vec<TaskKind>,
    pub health: Option<HealthReport>,
    pub dispatch: Option<DispatchReport>,
    /// Inventories queued by the gossip cycle
    pub gossip_queued: usize,
}

/// Assembles a [`MeshNode`] from configuration and capabilities
pub struct MeshNodeBuilder {
    config: MeshConfig,
    crypto: Option<Arc<dyn CryptoProvider>>,
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn PersistentStore>>,
    route_discovery: Option<Arc<dyn RouteDiscovery>>,
    time: Option<Arc<dyn TimeSource>>,
}

impl MeshNodeBuilder {
    pub fn new(config: MeshConfig) -> Self {
        Self {
            config,
            crypto: None,
            transport: None,
            store: None,
            route_discovery: None,
            time: None,
        }
    }

    pub fn crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to a volatile [`MemoryStore`]
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to an empty [`StaticRouteDiscovery`]; direct neighbours are always routable
    pub fn route_discovery(mut self, discovery: Arc<dyn RouteDiscovery>) -> Self {
        self.route_discovery = Some(discovery);
        self
    }

    /// Defaults to the system clock
    pub fn time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn build(self) -> MeshResult<MeshNode> {
        self.config.validate()?;
        let crypto = self
            .crypto
            .ok_or_else(|| MeshError::InvalidState("crypto provider not set".to_string()))?;
        let transport = self
            .transport
            .ok_or_else(|| MeshError::InvalidState("transport not set".to_string()))?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn PersistentStore>);
        let route_discovery = self
            .route_discovery
            .unwrap_or_else(|| Arc::new(StaticRouteDiscovery::new()) as Arc<dyn RouteDiscovery>);
        let time = self
            .time
            .unwrap_or_else(|| Arc::new(SystemTimeSource) as Arc<dyn TimeSource>);

        let config = self.config;
        let node_id = config.node.node_id.clone();
        let clock = Arc::new(LogicalClock::new(node_id.clone()));

        let node = MeshNode {
            ledger: LedgerStore::new(
                node_id.clone(),
                config.ledger.clone(),
                crypto.clone(),
                clock.clone(),
            ),
            trust: TrustRegistry::new(config.trust.clone(), clock.clone(), time.clone()),
            router: MultiHopRouter::new(node_id.clone(), &config.router),
            dispatcher: PriorityDispatcher::new(config.dispatcher.clone()),
            selector: MultiPathSelector::new(config.multipath.clone(), time.clone()),
            health: HealthMonitor::new(config.health.clone(), time.clone()),
            gossip: GossipSync::new(node_id.clone()),
            scheduler: Scheduler::new(&config, time.now_ms()),
            dropped_since_check: Vec::new(),
            delivered: Observers::new(),
            accepted: Observers::new(),
            node_id,
            clock,
            crypto,
            transport,
            store,
            route_discovery,
            time,
            config,
        };
        info!(node_id = %node.node_id, "Mesh node built");
        Ok(node)
    }
}

/// One mesh participant
pub struct MeshNode {
    node_id: PeerId,
    config: MeshConfig,
    clock: Arc<LogicalClock>,
    crypto: Arc<dyn CryptoProvider>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn PersistentStore>,
    route_discovery: Arc<dyn RouteDiscovery>,
    time: Arc<dyn TimeSource>,
    ledger: LedgerStore,
    trust: TrustRegistry,
    router: MultiHopRouter,
    dispatcher: PriorityDispatcher,
    selector: MultiPathSelector,
    health: HealthMonitor,
    gossip: GossipSync,
    scheduler: Scheduler,
    dropped_since_check: Vec<PeerId>,
    delivered: Observers<DeliveredMessage>,
    accepted: Observers<LedgerEntry>,
}

/// Route a frame to direct neighbours or the candidate table
struct NeighbourAwareDiscovery<'a> {
    inner: &'a dyn RouteDiscovery,
    connected: &'a [PeerId],
}

impl RouteDiscovery for NeighbourAwareDiscovery<'_> {
    fn candidate_routes(&self, target: &str) -> Vec<Vec<PeerId>> {
        let mut routes = self.inner.candidate_routes(target);
        if self.connected.iter().any(|p| p == target) && !routes.iter().any(|r| r.len() == 1 && r[0] == target) {
            routes.push(vec![target.to_string()]);
        }
        routes
    }
}

impl MeshNode {
    pub fn builder(config: MeshConfig) -> MeshNodeBuilder {
        MeshNodeBuilder::new(config)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn trust(&self) -> &TrustRegistry {
        &self.trust
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto
    }

    pub fn router_stats(&self) -> &RouterStats {
        self.router.stats()
    }

    pub fn gossip_stats(&self) -> &GossipStats {
        self.gossip.stats()
    }

    pub fn last_health_report(&self) -> Option<&HealthReport> {
        self.health.last_report()
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    /// Switch single-path routing on or off
    pub fn set_power_constrained(&mut self, constrained: bool) {
        self.selector.set_power_constrained(constrained);
    }

    // ---- produced interface ------------------------------------------------

    /// Current balance of an account
    pub fn query_balance(&self, account: &str) -> Amount {
        self.ledger.balance(account)
    }

    pub fn get_top_and_worst_peers(&self, n: usize) -> PeerRanking {
        self.trust.get_top_and_worst_peers(n)
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        self.dispatcher.stats()
    }

    /// Register a callback for messages delivered to this node
    pub fn on_message_delivered<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&DeliveredMessage) + Send + Sync + 'static,
    {
        self.delivered.subscribe(callback)
    }

    /// Register a callback for every ledger entry this node accepts
    pub fn on_ledger_entry_accepted<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LedgerEntry) + Send + Sync + 'static,
    {
        self.accepted.subscribe(callback)
    }

    // ---- sending -------------------------------------------------------------

    /// Queue an application message.
    ///
    /// A targeted message goes out over the best routes toward `target`; an
    /// untargeted one goes to every direct neighbour. Returns
    /// `QueuedForRetry` once admitted to the dispatch queue.
    pub fn send_message(
        &mut self,
        content: Vec<u8>,
        target: Option<PeerId>,
        qos: QosTier,
        metadata: BTreeMap<String, String>,
    ) -> Outcome {
        match self.try_send_message(content, target, qos, metadata) {
            Ok(()) => Outcome::QueuedForRetry,
            Err(err) => {
                warn!(node_id = %self.node_id, reason = err.reason(), error = %err, "Message not sent");
                Outcome::from(&err)
            }
        }
    }

    fn try_send_message(
        &mut self,
        content: Vec<u8>,
        target: Option<PeerId>,
        qos: QosTier,
        metadata: BTreeMap<String, String>,
    ) -> MeshResult<()> {
        if target.as_deref() == Some(self.node_id.as_str()) {
            return Err(MeshError::InvalidState("message addressed to self".to_string()));
        }
        let connected = self.transport.connected_peers();

        let hops = match &target {
            Some(target) => {
                let discovery = NeighbourAwareDiscovery {
                    inner: self.route_discovery.as_ref(),
                    connected: &connected,
                };
                let routes = self.selector.routes_for(target, &discovery, &self.trust)?;
                let mut hops: Vec<PeerId> = Vec::new();
                for hop in routes.iter().filter_map(|r| r.next_hop()) {
                    if !hops.contains(hop) {
                        hops.push(hop.clone());
                    }
                }
                hops
            }
            None => connected
                .into_iter()
                .filter(|p| self.selector.is_viable(p, &self.trust))
                .collect(),
        };
        if hops.is_empty() {
            return Err(RoutingError::NoPeers.into());
        }

        let envelope = self
            .router
            .originate(content, target, self.router.max_hops(), qos, metadata);
        let label = format!("mesh:{}", envelope.id);
        let bytes = WireMessage::Mesh(envelope).encode()?;
        self.enqueue(hops, bytes, FrameKind::Traffic, qos, 1.0, label)
    }

    /// Issue a transfer signed with `secret_key`, append it locally and
    /// push it to every neighbour.
    pub fn submit_transaction(&mut self, request: TransferRequest, secret_key: &[u8]) -> Outcome {
        match self.try_submit_transaction(request, secret_key) {
            Ok(_) => Outcome::Accepted,
            Err(err) => {
                warn!(node_id = %self.node_id, reason = err.reason(), error = %err, "Transaction refused");
                Outcome::from(&err)
            }
        }
    }

    fn try_submit_transaction(&mut self, request: TransferRequest, secret_key: &[u8]) -> MeshResult<LedgerEntry> {
        let entry = self.ledger.create_entry(request, secret_key)?;
        let accepted = self.ledger.validate_and_append(entry, &self.node_id)?;
        self.on_entry_accepted(&accepted, None);
        Ok(accepted)
    }

    fn on_entry_accepted(&mut self, entry: &LedgerEntry, from_peer: Option<&str>) {
        if let Err(err) = self.store.append_entry(entry) {
            error!(
                node_id = %self.node_id,
                index = entry.sequence_number,
                error = %err,
                "Failed to persist accepted entry"
            );
        }
        self.accepted.notify(entry);

        let peers: Vec<PeerId> = self
            .transport
            .connected_peers()
            .into_iter()
            .filter(|p| Some(p.as_str()) != from_peer)
            .collect();
        if peers.is_empty() {
            return;
        }
        let frame = WireMessage::BlockData {
            index: entry.sequence_number,
            entry: entry.clone(),
        };
        let label = format!("block:{}", entry.sequence_number);
        if let Err(err) = frame
            .encode()
            .and_then(|bytes| self.enqueue(peers, bytes, FrameKind::LedgerSync, QosTier::Sync, 1.0, label))
        {
            warn!(node_id = %self.node_id, error = %err, "Could not queue block push");
        }
    }

    fn enqueue(
        &mut self,
        hops: Vec<PeerId>,
        bytes: Vec<u8>,
        kind: FrameKind,
        qos: QosTier,
        reputation: f64,
        label: String,
    ) -> MeshResult<()> {
        let item = QueuedItem::new(
            OutboundFrame { hops, bytes, kind },
            qos,
            reputation,
            self.time.now_ms(),
            label,
        );
        self.dispatcher.enqueue(item)?;
        Ok(())
    }

    fn send_wire(&mut self, peer: &str, message: &WireMessage, reputation: f64) {
        let label = format!("{}:{}", message.kind(), peer);
        if let Err(err) = message
            .encode()
            .and_then(|bytes| {
                self.enqueue(
                    vec![peer.to_string()],
                    bytes,
                    FrameKind::LedgerSync,
                    QosTier::Sync,
                    reputation,
                    label,
                )
            })
        {
            warn!(node_id = %self.node_id, peer_id = %peer, error = %err, "Could not queue frame");
        }
    }

    // ---- inbound -------------------------------------------------------------

    /// Dispatch one transport event
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerDiscovered { peer_id } => self.on_peer_discovered(&peer_id),
            TransportEvent::PeerDropped { peer_id } => self.on_peer_dropped(&peer_id),
            TransportEvent::Frame { from, bytes } => self.handle_frame(&from, &bytes),
        }
    }

    /// A link came up: invalidate routes and advertise our ledger head
    pub fn on_peer_discovered(&mut self, peer_id: &str) {
        info!(node_id = %self.node_id, peer_id = %peer_id, "Peer discovered");
        self.selector.invalidate_routes();
        let inventory = self.gossip.on_peer_discovered(peer_id, &self.ledger);
        self.send_wire(peer_id, &inventory, 1.0);
    }

    /// A link went down; counted toward churn at the next health check
    pub fn on_peer_dropped(&mut self, peer_id: &str) {
        info!(node_id = %self.node_id, peer_id = %peer_id, "Peer dropped");
        if !self.dropped_since_check.iter().any(|p| p == peer_id) {
            self.dropped_since_check.push(peer_id.to_string());
        }
        self.selector.invalidate_routes();
    }

    /// Decode and act on a frame from a direct neighbour
    pub fn handle_frame(&mut self, from: &str, bytes: &[u8]) {
        let message = match WireMessage::decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(node_id = %self.node_id, peer_id = %from, error = %err, "Dropping undecodable frame");
                return;
            }
        };

        match message {
            WireMessage::Mesh(envelope) => self.handle_envelope(from, envelope),
            WireMessage::LedgerInventory {
                last_index,
                head_hash,
            } => {
                let replies =
                    self.gossip
                        .on_inventory(from, last_index, head_hash.as_deref(), &self.ledger);
                for reply in replies {
                    self.send_wire(from, &reply, 1.0);
                }
            }
            WireMessage::BlockData { index, entry } => {
                match self
                    .gossip
                    .on_block_data(from, index, entry, &mut self.ledger, &self.trust)
                {
                    BlockOutcome::Accepted(entry) => self.on_entry_accepted(&entry, Some(from)),
                    BlockOutcome::Gap { .. } => {
                        // Ask the sender to push from our head.
                        let inventory = self.gossip.inventory(&self.ledger);
                        self.send_wire(from, &inventory, 1.0);
                    }
                    BlockOutcome::Stale { .. }
                    | BlockOutcome::Conflict(_)
                    | BlockOutcome::Rejected(_) => {}
                }
            }
        }
    }

    fn handle_envelope(&mut self, from: &str, envelope: MeshMessageEnvelope) {
        let connected = self.transport.connected_peers();
        match self.router.on_receive(envelope, from, &connected) {
            RouteDecision::Deliver(envelope) => {
                let message = DeliveredMessage::from_envelope(envelope, from);
                self.delivered.notify(&message);
            }
            RouteDecision::Relay { envelope, peers } => {
                let peers: Vec<PeerId> = peers
                    .into_iter()
                    .filter(|p| self.selector.is_viable(p, &self.trust))
                    .collect();
                if peers.is_empty() {
                    debug!(node_id = %self.node_id, message_id = %envelope.id, "No viable relay peers");
                    return;
                }
                let qos = envelope.qos;
                let label = format!("relay:{}", envelope.id);
                let reputation = self.trust.get_score(from);
                if let Err(err) = WireMessage::Mesh(envelope)
                    .encode()
                    .and_then(|bytes| self.enqueue(peers, bytes, FrameKind::Traffic, qos, reputation, label))
                {
                    warn!(node_id = %self.node_id, peer_id = %from, error = %err, "Could not queue relay");
                }
            }
            RouteDecision::Drop(_) => {}
        }
    }

    // ---- periodic work -------------------------------------------------------

    /// Run every task due now, in order: health, gossip, dispatch
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.time.now_ms();
        for task in self.scheduler.due(now) {
            report.ran.push(task);
            match task {
                TaskKind::Health => report.health = Some(self.run_health_check().await),
                TaskKind::Gossip => report.gossip_queued = self.run_gossip_cycle(),
                TaskKind::Dispatch => report.dispatch = Some(self.dispatch_once().await),
            }
        }
        report
    }

    /// Evaluate connectivity and apply the healing action
    pub async fn run_health_check(&mut self) -> HealthReport {
        let connected = self
            .transport
            .connected_peers()
            .into_iter()
            .map(|peer_id| PeerLink {
                latency_ms: self.transport.link_latency_ms(&peer_id),
                peer_id,
            })
            .collect();
        let snapshot = ConnectivitySnapshot {
            connected,
            dropped: std::mem::take(&mut self.dropped_since_check),
        };
        let report = self.health.evaluate(&snapshot, &self.trust);
        self.selector.set_slow_peers(report.slow_peers.iter().cloned());

        match &report.action {
            HealAction::None => {}
            HealAction::Soft { reconnect } => {
                let mut restored = 0;
                for peer in reconnect {
                    if self.transport.reconnect(peer).await {
                        restored += 1;
                    }
                }
                info!(node_id = %self.node_id, attempted = reconnect.len(), restored, "Soft heal applied");
            }
            HealAction::Aggressive { discover } => {
                self.selector.invalidate_routes();
                let found = self.transport.discover_peers(*discover).await;
                info!(
                    node_id = %self.node_id,
                    requested = discover,
                    found = found.len(),
                    "Aggressive heal applied"
                );
            }
        }

        self.persist_trust();
        report
    }

    /// Queue an inventory for every connected peer
    pub fn run_gossip_cycle(&mut self) -> usize {
        let connected = self.transport.connected_peers();
        let frames = self.gossip.cycle(&connected, &self.ledger);
        let queued = frames.len();
        for (peer, frame) in frames {
            self.send_wire(&peer, &frame, 1.0);
        }
        debug!(node_id = %self.node_id, queued, head = self.ledger.head_index(), "Gossip cycle");
        queued
    }

    /// Send one batch and feed the per-peer results of mesh traffic into trust
    pub async fn dispatch_once(&mut self) -> DispatchReport {
        let report = self.dispatcher.tick(self.transport.as_ref()).await;
        for outcome in report
            .peer_outcomes
            .iter()
            .filter(|o| o.kind == FrameKind::Traffic)
        {
            let event = if outcome.success {
                TrustEvent::RelaySuccess
            } else {
                TrustEvent::RelayFailure
            };
            self.trust.record(&outcome.peer_id, event);
        }
        report
    }

    /// Dispatch until the queue is empty or every item has used its attempts
    pub async fn flush_outbound(&mut self) -> usize {
        let batch = self.config.dispatcher.batch_size.max(1);
        let rounds = (self.dispatcher.len() / batch + 1) * self.config.dispatcher.max_attempts as usize;
        let mut sent = 0;
        for _ in 0..rounds {
            if self.dispatcher.is_empty() {
                break;
            }
            sent += self.dispatch_once().await.delivered.len();
        }
        sent
    }

    fn persist_trust(&self) {
        if let Err(err) = self.store.save_trust(&self.trust.snapshot()) {
            error!(node_id = %self.node_id, error = %err, "Failed to persist trust scores");
        }
    }

    /// Stop periodic work and discard queued frames. No tick runs afterwards.
    pub fn stop(&mut self) {
        if self.scheduler.is_stopped() {
            return;
        }
        self.scheduler.stop();
        let discarded = self.dispatcher.clear();
        self.persist_trust();
        info!(node_id = %self.node_id, discarded, "Mesh node stopped");
    }

    /// Rebuild ledger and trust state from the persistent store.
    ///
    /// Must run before any entry is accepted.
    pub fn startup_replay(&mut self) -> MeshResult<usize> {
        if self.ledger.head_index() != 0 {
            return Err(MeshError::InvalidState(
                "replay requires an empty ledger".to_string(),
            ));
        }
        let entries = self.store.load_entries()?;
        let replayed = self.ledger.replay(entries)?;
        let scores = self.store.load_trust()?;
        let peers = scores.len();
        self.trust.restore(scores);
        info!(
            node_id = %self.node_id,
            replayed,
            peers,
            clock = self.clock.current(),
            "Startup replay complete"
        );
        Ok(replayed)
    }

    /// Drive the node until `shutdown` flips to true or the event stream closes.
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.node.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(node_id = %self.node_id, "Mesh node running");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        warn!(node_id = %self.node_id, "Transport event stream closed");
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.stop();
    }
}
