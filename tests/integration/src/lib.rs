//! Multi-node integration tests
//!
//! This test suite validates, over the in-memory transport:
//! - Multi-hop relay, hop limits and untargeted delivery
//! - Ledger gossip catch-up and propagation across relays
//! - Double-spend and replay rejection for entries pushed by a peer
//! - SQLite persistence and startup replay
//! - Dispatcher outcomes feeding trust scores and healing

pub mod test_utils;

#[cfg(test)]
mod relay_tests;

#[cfg(test)]
mod ledger_sync_tests;

#[cfg(test)]
mod adversarial_peer_tests;

#[cfg(test)]
mod persistence_tests;

#[cfg(test)]
mod trust_feedback_tests;
