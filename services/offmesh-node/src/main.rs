use anyhow::{bail, Context, Result};
use offmesh_core::{logging, MeshConfig, TransportEvent};
use offmesh_crypto::MeshCrypto;
use offmesh_mesh::{MemoryNetwork, MeshNode, PersistentStore, SqliteStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;
const LEDGER_DB_FILE: &str = "offmesh.db";

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    sim_peers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let raw: Vec<String> = std::env::args().collect();

    if raw.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let args = parse_args(&raw)?;
    let config = match &args.config {
        Some(path) => MeshConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => MeshConfig::for_node("offmesh-node"),
    };
    logging::init_from_config(&config.logging);

    info!(
        node_id = %config.node.node_id,
        config = ?args.config,
        sim_peers = args.sim_peers,
        "Starting offmesh node"
    );

    let network = MemoryNetwork::with_channel_capacity(config.node.inbound_channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (mut node, events) = build_node(&network, config.clone())?;
    let peers = spawn_sim_peers(&network, &config, args.sim_peers, &shutdown_rx)?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!(error = %err, "Failed to listen for Ctrl-C"),
        }
        let _ = shutdown_tx.send(true);
    });

    node.run(events, shutdown_rx).await;
    node.stop();

    for peer in peers {
        if let Err(err) = peer.await {
            error!(error = %err, "Simulated peer task failed");
        }
    }
    info!(
        head = node.ledger().head_index(),
        queue = ?node.get_queue_stats(),
        "Node shut down"
    );
    Ok(())
}

fn build_node(
    network: &MemoryNetwork,
    config: MeshConfig,
) -> Result<(MeshNode, mpsc::Receiver<TransportEvent>)> {
    let (transport, events) = network.register(config.node.node_id.clone());
    let data_dir = config.node.data_dir.clone();

    let mut builder = MeshNode::builder(config)
        .crypto(Arc::new(MeshCrypto::new()))
        .transport(Arc::new(transport));
    if let Some(dir) = &data_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data dir {}", dir.display()))?;
        let store: Arc<dyn PersistentStore> = Arc::new(
            SqliteStore::open(dir.join(LEDGER_DB_FILE)).context("opening ledger database")?,
        );
        builder = builder.store(store);
    }

    let mut node = builder.build().context("building mesh node")?;
    if data_dir.is_some() {
        let replayed = node.startup_replay().context("replaying persisted state")?;
        info!(node_id = %node.node_id(), replayed, "Persisted state restored");
    }
    Ok((node, events))
}

/// In-process neighbours for trying the node without a radio
fn spawn_sim_peers(
    network: &MemoryNetwork,
    config: &MeshConfig,
    count: usize,
    shutdown: &watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let mut peer_config = config.clone();
        peer_config.node.node_id = format!("{}-sim-{}", config.node.node_id, i + 1);
        peer_config.node.data_dir = None;
        let peer_id = peer_config.node.node_id.clone();

        let (mut peer, events) = build_node(network, peer_config)?;
        network.connect(&config.node.node_id, &peer_id);
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            peer.run(events, shutdown).await;
            peer.stop();
        }));
    }
    Ok(handles)
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args_iter = args.iter().skip(1);
    while let Some(arg) = args_iter.next() {
        match arg.as_str() {
            "--config" => match args_iter.next() {
                Some(path) => parsed.config = Some(PathBuf::from(path)),
                None => bail!("--config was provided without a path"),
            },
            "--sim-peers" => match args_iter.next() {
                Some(n) => {
                    parsed.sim_peers = n
                        .parse()
                        .with_context(|| format!("invalid --sim-peers value {n:?}"))?
                }
                None => bail!("--sim-peers was provided without a count"),
            },
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(parsed)
}
