//! Test utilities for multi-node simulations

use offmesh_core::clock::{ManualTimeSource, TimeSource};
use offmesh_core::ledger::TransferRequest;
use offmesh_core::{Amount, MeshConfig, TransportEvent};
use offmesh_crypto::{AccountKeypair, MeshCrypto};
use offmesh_mesh::{
    DeliveredMessage, MemoryNetwork, MeshNode, PersistentStore, StaticRouteDiscovery, Subscription,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Upper bound on settle rounds before a simulation is declared stuck
pub const MAX_SETTLE_ROUNDS: usize = 64;

/// Install a test subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Default test configuration: no proof of work so entries are cheap
pub fn test_config(node_id: &str) -> MeshConfig {
    let mut config = MeshConfig::for_node(node_id);
    config.ledger.pow_difficulty_bits = 0;
    config
}

/// One simulated node and the handles the tests poke at
pub struct SimNode {
    pub node: MeshNode,
    pub events: mpsc::Receiver<TransportEvent>,
    pub routes: Arc<StaticRouteDiscovery>,
    pub inbox: Arc<Mutex<Vec<DeliveredMessage>>>,
    _inbox_subscription: Subscription,
}

impl SimNode {
    /// Feed every pending transport event into the node
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.node.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Messages delivered to this node so far
    pub fn delivered(&self) -> Vec<DeliveredMessage> {
        self.inbox.lock().unwrap().clone()
    }
}

/// A set of nodes on one in-memory network sharing a manual clock
pub struct Simulation {
    pub network: MemoryNetwork,
    pub time: Arc<ManualTimeSource>,
    pub nodes: BTreeMap<String, SimNode>,
}

impl Simulation {
    pub fn new(ids: &[&str]) -> Self {
        Self::with_config(ids, |_| {})
    }

    /// Build nodes with a per-test configuration tweak
    pub fn with_config(ids: &[&str], tweak: impl Fn(&mut MeshConfig)) -> Self {
        init_tracing();
        let mut sim = Self {
            network: MemoryNetwork::new(),
            time: Arc::new(ManualTimeSource::new(1_700_000_000_000)),
            nodes: BTreeMap::new(),
        };
        for id in ids {
            let mut config = test_config(id);
            tweak(&mut config);
            sim.add_node(config, None);
        }
        sim
    }

    /// Add a node, optionally backed by a given store
    pub fn add_node(&mut self, config: MeshConfig, store: Option<Arc<dyn PersistentStore>>) {
        let id = config.node.node_id.clone();
        let (transport, events) = self.network.register(id.clone());
        let routes = Arc::new(StaticRouteDiscovery::new());

        let mut builder = MeshNode::builder(config)
            .crypto(Arc::new(MeshCrypto::new()))
            .transport(Arc::new(transport))
            .route_discovery(routes.clone())
            .time_source(self.time.clone());
        if let Some(store) = store {
            builder = builder.store(store);
        }
        let node = builder.build().unwrap();

        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = inbox.clone();
        let subscription = node.on_message_delivered(move |message| {
            sink.lock().unwrap().push(message.clone());
        });

        self.nodes.insert(
            id,
            SimNode {
                node,
                events,
                routes,
                inbox,
                _inbox_subscription: subscription,
            },
        );
    }

    pub fn link(&self, a: &str, b: &str) {
        assert!(self.network.connect(a, b), "cannot link {} and {}", a, b);
    }

    pub fn sim(&mut self, id: &str) -> &mut SimNode {
        self.nodes.get_mut(id).unwrap()
    }

    pub fn node(&self, id: &str) -> &MeshNode {
        &self.nodes[id].node
    }

    pub fn node_mut(&mut self, id: &str) -> &mut MeshNode {
        &mut self.sim(id).node
    }

    /// Alternate event handling and dispatch on every node until nothing moves.
    ///
    /// Returns the number of rounds that did work.
    pub async fn settle(&mut self) -> usize {
        for round in 0..MAX_SETTLE_ROUNDS {
            let mut active = false;
            for sim in self.nodes.values_mut() {
                if sim.pump() > 0 {
                    active = true;
                }
                if sim.node.flush_outbound().await > 0 {
                    active = true;
                }
            }
            if !active {
                return round;
            }
        }
        panic!("simulation did not settle within {} rounds", MAX_SETTLE_ROUNDS);
    }

    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }
}

/// Transfer of whole coins with a small fee
pub fn transfer(sender: &AccountKeypair, receiver: &AccountKeypair, coins: i64) -> TransferRequest {
    TransferRequest {
        sender_id: sender.account_id(),
        receiver_id: receiver.account_id(),
        amount: Amount::from_coins(coins).unwrap(),
        fee: Amount::from_units(1_000),
        coin_type: "MESH".to_string(),
        input_utxo_hash: None,
        transaction_id: None,
        wall_clock_time: 1_700_000_000_000,
    }
}

/// Transfer consuming a named output
pub fn spend(sender: &AccountKeypair, receiver: &AccountKeypair, utxo: &str) -> TransferRequest {
    TransferRequest {
        input_utxo_hash: Some(utxo.to_string()),
        ..transfer(sender, receiver, 1)
    }
}
