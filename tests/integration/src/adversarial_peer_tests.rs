//! A misbehaving peer pushing crafted ledger entries

use crate::test_utils::{spend, test_config, transfer, Simulation};
use offmesh_core::ledger::LedgerStore;
use offmesh_core::{
    CryptoProvider, LedgerEntry, LogicalClock, Outcome, Transport, TransportEvent, ValidationError,
};
use offmesh_crypto::{AccountKeypair, MeshCrypto};
use offmesh_mesh::{MemoryTransport, QosTier, WireMessage};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Raw transport for the misbehaving peer; the receiver keeps its inbox open
struct Rogue {
    transport: MemoryTransport,
    _events: mpsc::Receiver<TransportEvent>,
}

/// Honest node "b" with one spend of `utxo-1` accepted, plus a rogue
/// transport "m" linked to it.
async fn setup() -> (Simulation, Rogue, AccountKeypair, AccountKeypair) {
    let mut sim = Simulation::new(&["b"]);
    let (transport, events) = sim.network.register("m");
    let rogue = Rogue {
        transport,
        _events: events,
    };
    sim.link("m", "b");
    sim.settle().await;

    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();
    let outcome = sim
        .node_mut("b")
        .submit_transaction(spend(&alice, &bob, "utxo-1"), alice.secret_bytes());
    assert_eq!(outcome, Outcome::Accepted);
    sim.settle().await;
    (sim, rogue, alice, bob)
}

/// Scratch ledger holding a copy of `node`'s chain, used to forge follow-ups
fn mirror(sim: &Simulation, node: &str) -> LedgerStore {
    let config = test_config("m");
    let mut ledger = LedgerStore::new(
        "m",
        config.ledger,
        Arc::new(MeshCrypto::new()),
        Arc::new(LogicalClock::new("m")),
    );
    let entries = sim.node(node).ledger().entries_after(0).to_vec();
    ledger.replay(entries).unwrap();
    ledger
}

async fn push(rogue: &Rogue, entry: LedgerEntry) {
    let frame = WireMessage::BlockData {
        index: entry.sequence_number,
        entry,
    };
    rogue
        .transport
        .send("b", frame.encode().unwrap())
        .await
        .unwrap();
}

fn last_rejection(sim: &Simulation) -> ValidationError {
    sim.node("b")
        .ledger()
        .audit_log()
        .last()
        .map(|record| record.error.clone())
        .unwrap()
}

#[tokio::test]
async fn test_double_spend_push_is_rejected_and_peer_distrusted() {
    let (mut sim, rogue, alice, bob) = setup().await;

    let forged = mirror(&sim, "b")
        .create_entry(spend(&alice, &bob, "utxo-1"), alice.secret_bytes())
        .unwrap();
    push(&rogue, forged).await;
    sim.settle().await;

    let b = sim.node("b");
    assert_eq!(b.ledger().head_index(), 1);
    assert!(matches!(
        last_rejection(&sim),
        ValidationError::DoubleSpend { ref utxo } if utxo == "utxo-1"
    ));
    assert!(b.trust().get_score("m") <= 0.1);
    assert_eq!(b.gossip_stats().blocks_rejected, 1);

    // The offender no longer carries traffic.
    let outcome = sim.node_mut("b").send_message(
        b"to m".to_vec(),
        Some("m".to_string()),
        QosTier::Realtime,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::Rejected("no_route".to_string()));
}

#[tokio::test]
async fn test_replayed_nonce_is_rejected() {
    let (mut sim, rogue, alice, bob) = setup().await;
    let crypto = MeshCrypto::new();

    let mut forged = mirror(&sim, "b")
        .create_entry(transfer(&alice, &bob, 2), alice.secret_bytes())
        .unwrap();
    // Reuse the nonce of the accepted entry, then make hash and signature consistent again.
    forged.seq_nonce = 1;
    forged.entry_hash = forged.compute_hash(&crypto);
    forged.sender_signature = crypto
        .sign(&forged.signing_payload(), alice.secret_bytes())
        .unwrap();
    push(&rogue, forged).await;
    sim.settle().await;

    assert_eq!(sim.node("b").ledger().head_index(), 1);
    assert!(matches!(
        last_rejection(&sim),
        ValidationError::Replay {
            seq_nonce: 1,
            last_accepted: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_bad_signature_costs_reputation() {
    let (mut sim, rogue, alice, bob) = setup().await;
    let mallory = AccountKeypair::generate();

    let mut forged = mirror(&sim, "b")
        .create_entry(transfer(&alice, &bob, 9), alice.secret_bytes())
        .unwrap();
    forged.sender_signature = mallory.sign(&forged.signing_payload());
    push(&rogue, forged).await;
    sim.settle().await;

    assert_eq!(sim.node("b").ledger().head_index(), 1);
    assert!(matches!(
        last_rejection(&sim),
        ValidationError::InvalidSignature { .. }
    ));
    let score = sim.node("b").trust().get_score("m");
    assert!(score < 0.5 && score > 0.1, "score {}", score);
}

#[tokio::test]
async fn test_fork_is_held_not_merged() {
    let (mut sim, rogue, alice, bob) = setup().await;
    let carol = AccountKeypair::generate();

    // A chain that diverges from b at index 1.
    let mut other = LedgerStore::new(
        "m",
        test_config("m").ledger,
        Arc::new(MeshCrypto::new()),
        Arc::new(LogicalClock::new("m")),
    );
    let first = other
        .create_entry(transfer(&carol, &bob, 1), carol.secret_bytes())
        .unwrap();
    other.validate_and_append(first, "m").unwrap();
    let divergent = other
        .create_entry(transfer(&alice, &bob, 4), alice.secret_bytes())
        .unwrap();
    assert_eq!(divergent.sequence_number, 2);

    let head_before = sim.node("b").ledger().head_hash().map(str::to_string);
    push(&rogue, divergent.clone()).await;
    sim.settle().await;

    let b = sim.node("b");
    assert_eq!(b.ledger().head_index(), 1);
    assert_eq!(b.ledger().head_hash().map(str::to_string), head_before);
    assert_eq!(b.ledger().conflicts().count(), 1);
    assert_eq!(b.gossip_stats().conflicts, 1);

    // Pushed again on the next round, the same entry is not queued twice.
    push(&rogue, divergent).await;
    sim.settle().await;
    let b = sim.node("b");
    assert_eq!(b.ledger().conflicts().count(), 1);
    assert_eq!(b.ledger().metrics().conflicts_total, 1);
    assert_eq!(b.gossip_stats().conflicts, 1);
}
