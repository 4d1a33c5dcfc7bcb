//! Ledger gossip between nodes

use crate::test_utils::{spend, transfer, Simulation};
use offmesh_core::{LedgerEntry, Outcome};
use offmesh_crypto::AccountKeypair;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_late_joiner_catches_up() {
    let mut sim = Simulation::new(&["a", "b"]);
    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();

    for coins in 1..=5 {
        let outcome = sim
            .node_mut("a")
            .submit_transaction(transfer(&alice, &bob, coins), alice.secret_bytes());
        assert_eq!(outcome, Outcome::Accepted);
    }
    assert_eq!(sim.node("b").ledger().head_index(), 0);

    sim.link("a", "b");
    sim.settle().await;

    let a = sim.node("a").ledger();
    let b = sim.node("b").ledger();
    assert_eq!(b.head_index(), 5);
    assert_eq!(b.head_hash(), a.head_hash());
    assert_eq!(b.balance(&bob.account_id()), a.balance(&bob.account_id()));
    assert_eq!(b.last_seq_nonce(&alice.account_id()), 5);
    assert_eq!(sim.node("b").gossip_stats().blocks_accepted, 5);
}

#[tokio::test]
async fn test_submission_propagates_across_relay() {
    let mut sim = Simulation::new(&["a", "b", "c"]);
    sim.link("a", "b");
    sim.link("b", "c");
    sim.settle().await;

    let seen = Arc::new(Mutex::new(Vec::<LedgerEntry>::new()));
    let sink = seen.clone();
    let _subscription = sim.node("c").on_ledger_entry_accepted(move |entry| {
        sink.lock().unwrap().push(entry.clone());
    });

    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();
    let outcome = sim
        .node_mut("a")
        .submit_transaction(transfer(&alice, &bob, 3), alice.secret_bytes());
    assert_eq!(outcome, Outcome::Accepted);
    sim.settle().await;

    for id in ["a", "b", "c"] {
        assert_eq!(sim.node(id).ledger().head_index(), 1, "node {}", id);
    }
    let head = sim.node("a").ledger().head_hash().map(str::to_string);
    assert_eq!(sim.node("c").ledger().head_hash().map(str::to_string), head);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(Some(seen[0].entry_hash.clone()), head);
}

#[tokio::test]
async fn test_gossip_cycle_repairs_missed_pushes() {
    let mut sim = Simulation::new(&["a", "b"]);
    sim.link("a", "b");
    sim.settle().await;

    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();
    // Pushes are lost while the link is lossy.
    sim.network.set_lossy("a", "b", true);
    for _ in 0..2 {
        sim.node_mut("a")
            .submit_transaction(transfer(&alice, &bob, 1), alice.secret_bytes());
    }
    sim.settle().await;
    assert_eq!(sim.node("b").ledger().head_index(), 0);

    sim.network.set_lossy("a", "b", false);
    let queued = sim.node_mut("b").run_gossip_cycle();
    assert_eq!(queued, 1);
    sim.settle().await;

    assert_eq!(sim.node("b").ledger().head_index(), 2);
    assert_eq!(
        sim.node("b").ledger().head_hash(),
        sim.node("a").ledger().head_hash()
    );
}

#[tokio::test]
async fn test_spent_output_tracked_on_every_replica() {
    let mut sim = Simulation::new(&["a", "b"]);
    sim.link("a", "b");
    sim.settle().await;

    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();
    let outcome = sim
        .node_mut("a")
        .submit_transaction(spend(&alice, &bob, "utxo-7"), alice.secret_bytes());
    assert_eq!(outcome, Outcome::Accepted);
    sim.settle().await;
    assert!(sim.node("b").ledger().is_spent("utxo-7"));

    let outcome = sim
        .node_mut("b")
        .submit_transaction(spend(&alice, &bob, "utxo-7"), alice.secret_bytes());
    assert_eq!(outcome, Outcome::Rejected("double_spend".to_string()));
    assert_eq!(sim.node("b").ledger().head_index(), 1);
}
