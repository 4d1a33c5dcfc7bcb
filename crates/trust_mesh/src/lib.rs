//! Trust Mesh Service
//!
//! This crate implements the reputation layer of an OffMesh node:
//! - Per-peer trust scores driven by relay and ledger evidence
//! - Time-boxed blacklisting after repeated failures
//! - Optional decay of scores back toward neutral
//! - Connectivity health checks that decide how to heal the mesh
//!
//! Scores bias both dispatch order and multi-path route selection.

pub mod node_health;
pub mod trust;

pub use node_health::{
    ConnectivitySnapshot, HealAction, HealthCounters, HealthMonitor, HealthReport,
    MeshHealthStatus, PeerLink,
};
pub use trust::{PeerRanking, TrustEvent, TrustRegistry, TrustScore};
