//! Multi-hop relay over the in-memory network

use crate::test_utils::Simulation;
use offmesh_core::Outcome;
use offmesh_mesh::QosTier;
use std::collections::BTreeMap;

fn line(ids: &[&str]) -> Simulation {
    let sim = Simulation::new(ids);
    for pair in ids.windows(2) {
        sim.link(pair[0], pair[1]);
    }
    sim
}

#[tokio::test]
async fn test_targeted_message_crosses_one_relay() {
    let mut sim = line(&["a", "b", "c"]);
    sim.settle().await;
    sim.sim("a")
        .routes
        .add_route("c", vec!["b".to_string(), "c".to_string()]);

    let mut metadata = BTreeMap::new();
    metadata.insert("kind".to_string(), "status".to_string());
    let outcome = sim.node_mut("a").send_message(
        b"grid 4 clear".to_vec(),
        Some("c".to_string()),
        QosTier::Critical,
        metadata,
    );
    assert_eq!(outcome, Outcome::QueuedForRetry);
    sim.settle().await;

    let delivered = sim.nodes["c"].delivered();
    assert_eq!(delivered.len(), 1);
    let message = &delivered[0];
    assert_eq!(message.content, b"grid 4 clear".to_vec());
    assert_eq!(message.origin_node_id, "a");
    assert_eq!(message.from_peer, "b");
    assert_eq!(message.qos, QosTier::Critical);
    assert_eq!(message.metadata.get("kind").map(String::as_str), Some("status"));

    assert!(sim.nodes["b"].delivered().is_empty());
    assert_eq!(sim.node("b").router_stats().relayed, 1);
    assert_eq!(sim.node("a").router_stats().originated, 1);
}

#[tokio::test]
async fn test_direct_neighbour_needs_no_route_table() {
    let mut sim = line(&["a", "b"]);
    sim.settle().await;

    let outcome = sim.node_mut("a").send_message(
        b"ping".to_vec(),
        Some("b".to_string()),
        QosTier::Realtime,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::QueuedForRetry);
    sim.settle().await;

    assert_eq!(sim.nodes["b"].delivered().len(), 1);
    assert!(sim.node("a").trust().get_score("b") > 0.5);
}

#[tokio::test]
async fn test_untargeted_message_stays_with_neighbours() {
    let mut sim = line(&["a", "b", "c"]);
    sim.settle().await;

    let outcome = sim.node_mut("a").send_message(
        b"beacon".to_vec(),
        None,
        QosTier::Bulk,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::QueuedForRetry);
    sim.settle().await;

    assert_eq!(sim.nodes["b"].delivered().len(), 1);
    assert!(sim.nodes["c"].delivered().is_empty());
    assert_eq!(sim.node("b").router_stats().relayed, 0);
}

#[tokio::test]
async fn test_hop_limit_stops_long_paths() {
    let mut sim = line(&["a", "b", "c", "d", "e"]);
    sim.settle().await;
    sim.sim("a").routes.add_route(
        "e",
        ["b", "c", "d", "e"].iter().map(|s| s.to_string()).collect(),
    );

    let outcome = sim.node_mut("a").send_message(
        b"too far".to_vec(),
        Some("e".to_string()),
        QosTier::Realtime,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::QueuedForRetry);
    sim.settle().await;

    assert_eq!(sim.node("b").router_stats().relayed, 1);
    assert_eq!(sim.node("c").router_stats().relayed, 1);
    assert_eq!(sim.node("d").router_stats().dropped_ttl, 1);
    assert_eq!(sim.node("d").router_stats().relayed, 0);
    assert!(sim.nodes["e"].delivered().is_empty());
}

#[tokio::test]
async fn test_ring_delivers_exactly_once() {
    let mut sim = Simulation::new(&["a", "b", "c", "d"]);
    sim.link("a", "b");
    sim.link("b", "c");
    sim.link("a", "d");
    sim.link("d", "c");
    sim.settle().await;
    sim.sim("a")
        .routes
        .add_route("c", vec!["b".to_string(), "c".to_string()]);
    sim.sim("a")
        .routes
        .add_route("c", vec!["d".to_string(), "c".to_string()]);

    let outcome = sim.node_mut("a").send_message(
        b"both ways".to_vec(),
        Some("c".to_string()),
        QosTier::Critical,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::QueuedForRetry);
    sim.settle().await;

    assert_eq!(sim.nodes["c"].delivered().len(), 1);
    assert_eq!(sim.node("c").router_stats().dropped_duplicate, 1);
}

#[tokio::test]
async fn test_isolated_node_cannot_send() {
    let mut sim = Simulation::new(&["a", "b"]);

    let outcome = sim.node_mut("a").send_message(
        b"anyone?".to_vec(),
        None,
        QosTier::Realtime,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::Rejected("no_peers".to_string()));

    let outcome = sim.node_mut("a").send_message(
        b"hello b".to_vec(),
        Some("b".to_string()),
        QosTier::Realtime,
        BTreeMap::new(),
    );
    assert_eq!(outcome, Outcome::Rejected("no_route".to_string()));
}
