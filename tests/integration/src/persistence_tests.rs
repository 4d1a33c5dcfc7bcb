//! SQLite persistence and startup replay

use crate::test_utils::{test_config, transfer, Simulation};
use offmesh_core::Outcome;
use offmesh_crypto::AccountKeypair;
use offmesh_mesh::{MeshError, PersistentStore, SqliteStore};
use std::path::PathBuf;
use std::sync::Arc;

fn temp_db() -> PathBuf {
    std::env::temp_dir().join(format!("offmesh-it-{}.db", uuid::Uuid::new_v4()))
}

fn open(path: &PathBuf) -> Arc<dyn PersistentStore> {
    Arc::new(SqliteStore::open(path).unwrap())
}

#[tokio::test]
async fn test_restart_restores_ledger_and_trust() {
    let path = temp_db();
    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();

    let (head_hash, bob_balance, b_score) = {
        let mut sim = Simulation::new(&["b"]);
        sim.add_node(test_config("a"), Some(open(&path)));
        sim.link("a", "b");
        sim.settle().await;

        for coins in [2, 3, 5] {
            let outcome = sim
                .node_mut("a")
                .submit_transaction(transfer(&alice, &bob, coins), alice.secret_bytes());
            assert_eq!(outcome, Outcome::Accepted);
        }
        sim.settle().await;
        sim.node_mut("a").stop();

        let a = sim.node("a");
        (
            a.ledger().head_hash().map(str::to_string),
            a.query_balance(&bob.account_id()),
            a.trust().get_score("b"),
        )
    };

    let mut sim = Simulation::new(&["c"]);
    sim.add_node(test_config("a"), Some(open(&path)));
    let replayed = sim.node_mut("a").startup_replay().unwrap();
    assert_eq!(replayed, 3);

    let a = sim.node("a");
    assert_eq!(a.ledger().head_index(), 3);
    assert_eq!(a.ledger().head_hash().map(str::to_string), head_hash);
    assert_eq!(a.query_balance(&bob.account_id()), bob_balance);
    assert_eq!(a.ledger().last_seq_nonce(&alice.account_id()), 3);
    assert!((a.trust().get_score("b") - b_score).abs() < 1e-9);
    assert!(a.clock().current() >= 3);

    // The restored chain keeps growing and still gossips.
    let outcome = sim
        .node_mut("a")
        .submit_transaction(transfer(&alice, &bob, 1), alice.secret_bytes());
    assert_eq!(outcome, Outcome::Accepted);
    assert_eq!(sim.node("a").ledger().last_seq_nonce(&alice.account_id()), 4);

    sim.link("a", "c");
    sim.settle().await;
    assert_eq!(sim.node("c").ledger().head_index(), 4);

    drop(sim);
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn test_replay_refused_once_entries_exist() {
    let store: Arc<dyn PersistentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut sim = Simulation::new(&[]);
    sim.add_node(test_config("a"), Some(store.clone()));

    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();
    sim.node_mut("a")
        .submit_transaction(transfer(&alice, &bob, 1), alice.secret_bytes());
    assert_eq!(store.load_entries().unwrap().len(), 1);

    assert!(matches!(
        sim.node_mut("a").startup_replay(),
        Err(MeshError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_accepted_gossip_is_persisted_by_receiver() {
    let store: Arc<dyn PersistentStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut sim = Simulation::new(&["a"]);
    sim.add_node(test_config("b"), Some(store.clone()));
    sim.link("a", "b");
    sim.settle().await;

    let alice = AccountKeypair::generate();
    let bob = AccountKeypair::generate();
    for _ in 0..2 {
        sim.node_mut("a")
            .submit_transaction(transfer(&alice, &bob, 1), alice.secret_bytes());
    }
    sim.settle().await;

    let stored = store.load_entries().unwrap();
    let indices: Vec<u64> = stored.iter().map(|e| e.sequence_number).collect();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(
        stored.last().map(|e| e.entry_hash.as_str()),
        sim.node("b").ledger().head_hash()
    );

    sim.node_mut("b").run_health_check().await;
    let trust = store.load_trust().unwrap();
    assert!(trust.iter().any(|score| score.peer_id == "a"));
}
