//! Delivery outcomes feeding trust, routing and healing

use crate::test_utils::Simulation;
use offmesh_core::Outcome;
use offmesh_mesh::QosTier;
use offmesh_trust_mesh::{HealAction, MeshHealthStatus};
use std::collections::BTreeMap;

fn broadcast(sim: &mut Simulation, from: &str, qos: QosTier) -> Outcome {
    sim.node_mut(from)
        .send_message(b"status".to_vec(), None, qos, BTreeMap::new())
}

#[tokio::test]
async fn test_lossy_link_blacklists_peer() {
    let mut sim = Simulation::new(&["a", "b"]);
    sim.link("a", "b");
    sim.settle().await;

    sim.network.set_lossy("a", "b", true);
    assert_eq!(broadcast(&mut sim, "a", QosTier::Realtime), Outcome::QueuedForRetry);
    assert_eq!(broadcast(&mut sim, "a", QosTier::Realtime), Outcome::QueuedForRetry);
    sim.settle().await;

    let a = sim.node("a");
    let record = a.trust().get("b").unwrap();
    assert_eq!(record.consecutive_failures, 6);
    assert!(a.trust().is_blacklisted("b"));
    assert_eq!(a.get_queue_stats().dropped_total, 2);
    assert_eq!(a.get_queue_stats().depth, 0);
    assert!(sim.nodes["b"].delivered().is_empty());

    let ranking = a.get_top_and_worst_peers(1);
    assert_eq!(ranking.worst[0].0, "b");

    // Link is fine again but the blacklist window still applies.
    sim.network.set_lossy("a", "b", false);
    let outcome = sim.node_mut("a").send_message(
        b"retry".to_vec(),
        Some("b".to_string()),
        QosTier::Realtime,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::Rejected("no_route".to_string()));
    assert_eq!(
        broadcast(&mut sim, "a", QosTier::Realtime),
        Outcome::Rejected("no_peers".to_string())
    );
}

#[tokio::test]
async fn test_gossip_frames_do_not_move_trust() {
    let mut sim = Simulation::new(&["a", "b"]);
    sim.link("a", "b");
    sim.settle().await;

    let neutral = sim.node("a").trust().get_score("b");
    for _ in 0..10 {
        assert_eq!(sim.node_mut("a").run_gossip_cycle(), 1);
        sim.node_mut("b").run_gossip_cycle();
        sim.settle().await;
    }
    assert_eq!(sim.node("a").trust().get_score("b"), neutral);
    assert_eq!(sim.node("b").trust().get_score("a"), neutral);

    // Relayed traffic is what earns reputation.
    assert_eq!(broadcast(&mut sim, "a", QosTier::Realtime), Outcome::QueuedForRetry);
    sim.settle().await;
    assert!(sim.node("a").trust().get_score("b") > neutral);
}

#[tokio::test]
async fn test_slow_peer_loses_route_preference() {
    let mut sim = Simulation::new(&["a", "b", "c", "d"]);
    sim.link("a", "b");
    sim.link("a", "d");
    sim.link("b", "c");
    sim.link("d", "c");
    sim.settle().await;
    sim.network.set_latency("a", "b", 900);

    let before = sim.node("a").trust().get_score("b");
    let report = sim.node_mut("a").run_health_check().await;
    assert_eq!(report.slow_peers, vec!["b".to_string()]);
    assert_eq!(report.status, MeshHealthStatus::Healthy);
    assert!(sim.node("a").trust().get_score("b") < before);

    for via in ["b", "d"] {
        sim.sim("a")
            .routes
            .add_route("c", vec![via.to_string(), "c".to_string()]);
    }
    sim.node_mut("a").set_power_constrained(true);
    let outcome = sim.node_mut("a").send_message(
        b"one path only".to_vec(),
        Some("c".to_string()),
        QosTier::Critical,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::QueuedForRetry);
    sim.settle().await;

    let delivered = sim.nodes["c"].delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].from_peer, "d");
    assert_eq!(sim.node("b").router_stats().relayed, 0);
}

#[tokio::test]
async fn test_single_drop_triggers_soft_reconnect() {
    let peers = ["p1", "p2", "p3", "p4", "p5", "p6"];
    let mut ids = vec!["a"];
    ids.extend(peers);
    let mut sim = Simulation::new(&ids);
    for peer in peers {
        sim.link("a", peer);
    }
    sim.settle().await;

    sim.network.disconnect("a", "p1");
    sim.settle().await;
    assert!(!sim.network.is_connected("a", "p1"));

    let report = sim.node_mut("a").run_health_check().await;
    assert_eq!(report.status, MeshHealthStatus::Degraded);
    assert_eq!(
        report.action,
        HealAction::Soft {
            reconnect: vec!["p1".to_string()]
        }
    );
    assert!(sim.network.is_connected("a", "p1"));

    // The restored link is a fresh discovery on both ends; the next check is clean.
    sim.settle().await;
    let report = sim.node_mut("a").run_health_check().await;
    assert_eq!(report.action, HealAction::None);
}

#[tokio::test]
async fn test_heavy_churn_discovers_replacements() {
    let mut sim = Simulation::new(&["a", "b", "c", "d", "e"]);
    sim.link("a", "b");
    sim.link("a", "c");
    sim.settle().await;

    sim.network.set_offline("b", true);
    sim.network.set_offline("c", true);
    sim.settle().await;

    let report = sim.node_mut("a").run_health_check().await;
    assert_eq!(report.status, MeshHealthStatus::Critical);
    assert_eq!(report.action, HealAction::Aggressive { discover: 4 });
    assert_eq!(
        sim.network.neighbours("a"),
        vec!["d".to_string(), "e".to_string()]
    );

    // New neighbours receive traffic once their discovery events are handled.
    sim.settle().await;
    assert_eq!(broadcast(&mut sim, "a", QosTier::Realtime), Outcome::QueuedForRetry);
    sim.settle().await;
    assert_eq!(sim.nodes["d"].delivered().len(), 1);
    assert_eq!(sim.nodes["e"].delivered().len(), 1);
}

#[tokio::test]
async fn test_full_queue_evicts_bulk_only() {
    let mut sim = Simulation::with_config(&["a", "b"], |config| {
        config.dispatcher.capacity = 2;
    });
    sim.link("a", "b");
    sim.settle().await;

    assert_eq!(broadcast(&mut sim, "a", QosTier::Bulk), Outcome::QueuedForRetry);
    assert_eq!(broadcast(&mut sim, "a", QosTier::Bulk), Outcome::QueuedForRetry);
    assert_eq!(broadcast(&mut sim, "a", QosTier::Critical), Outcome::QueuedForRetry);
    assert_eq!(broadcast(&mut sim, "a", QosTier::Realtime), Outcome::QueuedForRetry);

    let stats = sim.node("a").get_queue_stats();
    assert_eq!(stats.depth, 2);
    assert_eq!(stats.evicted_total, 2);

    // Nothing bulk is left to evict.
    assert_eq!(
        broadcast(&mut sim, "a", QosTier::Bulk),
        Outcome::Rejected("queue_full".to_string())
    );
    assert_eq!(sim.node("a").get_queue_stats().rejected_total, 1);

    sim.settle().await;
    let mut tiers: Vec<QosTier> = sim.nodes["b"].delivered().iter().map(|m| m.qos).collect();
    tiers.sort();
    assert_eq!(tiers, vec![QosTier::Realtime, QosTier::Critical]);
}
