//! Node Health Module
//!
//! Periodic connectivity check. Measures churn among the node's links,
//! decides how hard to heal, and flags slow peers so routing can
//! deprioritise them. The monitor only decides; the node applies the
//! resulting [`HealAction`] against its transport and route selector.

use crate::trust::{TrustEvent, TrustRegistry};
use offmesh_core::clock::TimeSource;
use offmesh_core::config::HealthConfig;
use offmesh_core::types::PeerId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Mesh connectivity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshHealthStatus {
    /// No churn since the last check
    Healthy,
    /// Some links dropped; soft healing is enough
    Degraded,
    /// Churn at or above the aggressive threshold
    Critical,
}

/// A connected peer and its last measured latency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerLink {
    pub peer_id: PeerId,
    pub latency_ms: Option<u64>,
}

/// Connectivity observed since the previous check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivitySnapshot {
    pub connected: Vec<PeerLink>,
    /// Peers whose links dropped since the previous check
    pub dropped: Vec<PeerId>,
}

impl ConnectivitySnapshot {
    /// dropped / (connected + dropped); 0 when both are empty
    pub fn churn_rate(&self) -> f64 {
        let total = self.connected.len() + self.dropped.len();
        if total == 0 {
            return 0.0;
        }
        self.dropped.len() as f64 / total as f64
    }
}

/// Healing decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealAction {
    /// Nothing to do
    None,
    /// Lightweight reconnection to each dropped peer
    Soft { reconnect: Vec<PeerId> },
    /// Invalidate routes and discover `discover` new peers
    Aggressive { discover: usize },
}

/// Result of one health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Unix milliseconds of the check
    pub timestamp: u64,
    pub churn_rate: f64,
    pub status: MeshHealthStatus,
    pub action: HealAction,
    /// Connected peers over the latency threshold
    pub slow_peers: Vec<PeerId>,
}

/// Running totals across checks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounters {
    pub checks_total: u64,
    pub soft_heals_total: u64,
    pub aggressive_heals_total: u64,
    pub slow_flags_total: u64,
}

/// Churn and latency monitor
pub struct HealthMonitor {
    config: HealthConfig,
    time: Arc<dyn TimeSource>,
    counters: HealthCounters,
    last_report: Option<HealthReport>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            time,
            counters: HealthCounters::default(),
            last_report: None,
        }
    }

    /// Evaluate one snapshot.
    ///
    /// Slow peers receive the `HighLatency` trust penalty as a side effect.
    pub fn evaluate(&mut self, snapshot: &ConnectivitySnapshot, trust: &TrustRegistry) -> HealthReport {
        let churn_rate = snapshot.churn_rate();

        let (status, action) = if !snapshot.dropped.is_empty()
            && churn_rate >= self.config.aggressive_churn_threshold
        {
            (
                MeshHealthStatus::Critical,
                HealAction::Aggressive {
                    discover: snapshot.dropped.len() * self.config.discovery_multiplier,
                },
            )
        } else if churn_rate > 0.0 {
            (
                MeshHealthStatus::Degraded,
                HealAction::Soft {
                    reconnect: snapshot.dropped.clone(),
                },
            )
        } else {
            (MeshHealthStatus::Healthy, HealAction::None)
        };

        let mut slow_peers = Vec::new();
        for link in &snapshot.connected {
            let Some(latency_ms) = link.latency_ms else {
                continue;
            };
            if latency_ms > self.config.slow_latency_ms
                && trust.get_score(&link.peer_id) > self.config.slow_score_floor
            {
                trust.record(&link.peer_id, TrustEvent::HighLatency { latency_ms });
                slow_peers.push(link.peer_id.clone());
            }
        }

        self.counters.checks_total += 1;
        self.counters.slow_flags_total += slow_peers.len() as u64;
        match &action {
            HealAction::Aggressive { discover } => {
                self.counters.aggressive_heals_total += 1;
                info!(
                    churn_rate,
                    dropped = snapshot.dropped.len(),
                    discover,
                    "Aggressive heal: invalidating routes and discovering peers"
                );
            }
            HealAction::Soft { reconnect } => {
                self.counters.soft_heals_total += 1;
                info!(churn_rate, reconnect = reconnect.len(), "Soft heal: reconnecting dropped peers");
            }
            HealAction::None => {
                debug!(connected = snapshot.connected.len(), "Mesh healthy");
            }
        }

        let report = HealthReport {
            timestamp: self.time.now_ms(),
            churn_rate,
            status,
            action,
            slow_peers,
        };
        self.last_report = Some(report.clone());
        report
    }

    /// Most recent report
    pub fn last_report(&self) -> Option<&HealthReport> {
        self.last_report.as_ref()
    }

    pub fn counters(&self) -> &HealthCounters {
        &self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offmesh_core::clock::{LogicalClock, ManualTimeSource};
    use offmesh_core::config::TrustConfig;

    fn setup() -> (HealthMonitor, TrustRegistry) {
        let time = Arc::new(ManualTimeSource::new(5_000));
        let trust = TrustRegistry::new(
            TrustConfig::default(),
            Arc::new(LogicalClock::new("node-a")),
            time.clone(),
        );
        (HealthMonitor::new(HealthConfig::default(), time), trust)
    }

    fn link(peer: &str, latency_ms: Option<u64>) -> PeerLink {
        PeerLink {
            peer_id: peer.to_string(),
            latency_ms,
        }
    }

    fn snapshot(connected: usize, dropped: usize) -> ConnectivitySnapshot {
        ConnectivitySnapshot {
            connected: (0..connected).map(|i| link(&format!("c{}", i), Some(20))).collect(),
            dropped: (0..dropped).map(|i| format!("d{}", i)).collect(),
        }
    }

    #[test]
    fn test_healthy_when_nothing_dropped() {
        let (mut monitor, trust) = setup();
        let report = monitor.evaluate(&snapshot(5, 0), &trust);
        assert_eq!(report.status, MeshHealthStatus::Healthy);
        assert_eq!(report.action, HealAction::None);
        assert_eq!(report.churn_rate, 0.0);
        assert_eq!(report.timestamp, 5_000);
    }

    #[test]
    fn test_empty_snapshot_has_zero_churn() {
        let (mut monitor, trust) = setup();
        let report = monitor.evaluate(&ConnectivitySnapshot::default(), &trust);
        assert_eq!(report.churn_rate, 0.0);
        assert_eq!(report.action, HealAction::None);
    }

    #[test]
    fn test_churn_at_threshold_is_aggressive() {
        let (mut monitor, trust) = setup();
        let report = monitor.evaluate(&snapshot(8, 2), &trust);
        assert!((report.churn_rate - 0.20).abs() < 1e-12);
        assert_eq!(report.status, MeshHealthStatus::Critical);
        assert_eq!(report.action, HealAction::Aggressive { discover: 4 });
        assert_eq!(monitor.counters().aggressive_heals_total, 1);
    }

    #[test]
    fn test_low_churn_is_soft() {
        let (mut monitor, trust) = setup();
        let report = monitor.evaluate(&snapshot(9, 1), &trust);
        assert_eq!(report.status, MeshHealthStatus::Degraded);
        assert_eq!(
            report.action,
            HealAction::Soft {
                reconnect: vec!["d0".to_string()]
            }
        );
    }

    #[test]
    fn test_all_dropped_is_aggressive() {
        let (mut monitor, trust) = setup();
        let report = monitor.evaluate(&snapshot(0, 3), &trust);
        assert_eq!(report.churn_rate, 1.0);
        assert_eq!(report.action, HealAction::Aggressive { discover: 6 });
    }

    #[test]
    fn test_slow_peers_flagged_and_penalised() {
        let (mut monitor, trust) = setup();
        trust.penalize("weak", 0.45);
        let snap = ConnectivitySnapshot {
            connected: vec![
                link("fast", Some(40)),
                link("slow", Some(800)),
                link("edge", Some(500)),
                link("weak", Some(900)),
                link("unknown", None),
            ],
            dropped: Vec::new(),
        };

        let report = monitor.evaluate(&snap, &trust);
        assert_eq!(report.slow_peers, vec!["slow".to_string()]);
        assert!((trust.get_score("slow") - 0.48).abs() < 1e-9);
        assert_eq!(trust.get_score("fast"), 0.5);
        assert!((trust.get_score("weak") - 0.05).abs() < 1e-9);
        assert_eq!(monitor.last_report(), Some(&report));
    }
}
