//! Multi-path route selection and concurrent fan-out.
//!
//! Candidate routes come from a [`RouteDiscovery`] capability. Routes through
//! badly scored or blacklisted peers are discarded; the rest are ranked by
//! reputation and length and the best K are used in parallel.

use futures_util::future::join_all;
use offmesh_core::capability::Transport;
use offmesh_core::clock::TimeSource;
use offmesh_core::config::MultiPathConfig;
use offmesh_core::error::{RoutingError, TransportError};
use offmesh_core::types::PeerId;
use offmesh_trust_mesh::TrustRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// A scored path to a destination. `hops[0]` is a direct neighbour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub hops: Vec<PeerId>,
    pub aggregate_score: f64,
}

impl RouteCandidate {
    /// First hop, the peer the frame is actually sent to
    pub fn next_hop(&self) -> Option<&PeerId> {
        self.hops.first()
    }
}

/// Source of candidate paths toward a destination
pub trait RouteDiscovery: Send + Sync {
    /// Known paths to `target`, each starting at a direct neighbour
    fn candidate_routes(&self, target: &str) -> Vec<Vec<PeerId>>;
}

/// Route discovery over a fixed, manually maintained table
#[derive(Debug, Default)]
pub struct StaticRouteDiscovery {
    routes: RwLock<HashMap<PeerId, Vec<Vec<PeerId>>>>,
}

impl StaticRouteDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path to `target`
    pub fn add_route(&self, target: impl Into<PeerId>, hops: Vec<PeerId>) {
        let mut routes = self.routes.write().unwrap_or_else(|p| p.into_inner());
        routes.entry(target.into()).or_default().push(hops);
    }

    /// Forget every path to `target`
    pub fn remove_routes(&self, target: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|p| p.into_inner());
        routes.remove(target);
    }
}

impl RouteDiscovery for StaticRouteDiscovery {
    fn candidate_routes(&self, target: &str) -> Vec<Vec<PeerId>> {
        let routes = self.routes.read().unwrap_or_else(|p| p.into_inner());
        routes.get(target).cloned().unwrap_or_default()
    }
}

struct CachedRoutes {
    candidates: Vec<Vec<PeerId>>,
    cached_at: u64,
}

/// Reputation-weighted top-K path selector
pub struct MultiPathSelector {
    config: MultiPathConfig,
    time: Arc<dyn TimeSource>,
    slow_peers: HashSet<PeerId>,
    cache: HashMap<PeerId, CachedRoutes>,
}

impl MultiPathSelector {
    pub fn new(config: MultiPathConfig, time: Arc<dyn TimeSource>) -> Self {
        Self {
            config,
            time,
            slow_peers: HashSet::new(),
            cache: HashMap::new(),
        }
    }

    /// Number of routes a send uses
    pub fn k(&self) -> usize {
        if self.config.power_constrained {
            1
        } else {
            self.config.k_paths.max(1)
        }
    }

    /// Force single-path operation to save power
    pub fn set_power_constrained(&mut self, constrained: bool) {
        if constrained != self.config.power_constrained {
            info!(constrained, "Power-constrained routing changed");
        }
        self.config.power_constrained = constrained;
    }

    /// Replace the set of peers flagged slow by the last health check
    pub fn set_slow_peers(&mut self, peers: impl IntoIterator<Item = PeerId>) {
        self.slow_peers = peers.into_iter().collect();
    }

    pub fn is_slow(&self, peer_id: &str) -> bool {
        self.slow_peers.contains(peer_id)
    }

    /// Drop every cached route
    pub fn invalidate_routes(&mut self) {
        let dropped = self.cache.len();
        self.cache.clear();
        debug!(dropped, "Route cache invalidated");
    }

    fn peer_score(&self, peer_id: &str, trust: &TrustRegistry) -> f64 {
        let score = trust.get_score(peer_id);
        if self.is_slow(peer_id) {
            score * self.config.slow_penalty
        } else {
            score
        }
    }

    /// Whether a peer may carry traffic at all
    pub fn is_viable(&self, peer_id: &str, trust: &TrustRegistry) -> bool {
        trust.get_score(peer_id) >= self.config.blacklist_threshold && !trust.is_blacklisted(peer_id)
    }

    /// Filter, score and rank candidate paths, keeping the best K.
    pub fn select(
        &self,
        target: &str,
        candidates: &[Vec<PeerId>],
        trust: &TrustRegistry,
    ) -> Result<Vec<RouteCandidate>, RoutingError> {
        let mut scored: Vec<RouteCandidate> = candidates
            .iter()
            .filter(|hops| !hops.is_empty())
            .filter(|hops| hops.iter().all(|peer| self.is_viable(peer, trust)))
            .map(|hops| {
                let mean = hops.iter().map(|p| self.peer_score(p, trust)).sum::<f64>()
                    / hops.len() as f64;
                let aggregate_score =
                    self.config.score_weight * mean + self.config.hop_weight / hops.len() as f64;
                RouteCandidate {
                    hops: hops.clone(),
                    aggregate_score,
                }
            })
            .collect();

        if scored.is_empty() {
            return Err(RoutingError::NoRoute {
                target: target.to_string(),
                discovered: candidates.len(),
                filtered: candidates.len(),
            });
        }

        let filtered = candidates.len() - scored.len();
        scored.sort_by(|a, b| {
            b.aggregate_score
                .total_cmp(&a.aggregate_score)
                .then_with(|| a.hops.len().cmp(&b.hops.len()))
        });
        scored.truncate(self.k());

        debug!(
            target = %target,
            discovered = candidates.len(),
            filtered,
            selected = scored.len(),
            "Routes selected"
        );
        Ok(scored)
    }

    /// Select routes to `target`, consulting discovery when the cache is cold.
    pub fn routes_for(
        &mut self,
        target: &str,
        discovery: &dyn RouteDiscovery,
        trust: &TrustRegistry,
    ) -> Result<Vec<RouteCandidate>, RoutingError> {
        let now = self.time.now_ms();
        let fresh = self
            .cache
            .get(target)
            .map(|c| now.saturating_sub(c.cached_at) < self.config.route_cache_ttl_ms)
            .unwrap_or(false);

        if !fresh {
            let candidates = discovery.candidate_routes(target);
            self.cache.insert(
                target.to_string(),
                CachedRoutes {
                    candidates,
                    cached_at: now,
                },
            );
        }

        let candidates = self
            .cache
            .get(target)
            .map(|c| c.candidates.clone())
            .unwrap_or_default();
        self.select(target, &candidates, trust)
    }

    /// Number of targets with cached candidates
    pub fn cached_targets(&self) -> usize {
        self.cache.len()
    }
}

/// Result of sending one frame to several peers at once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutResult {
    pub succeeded: Vec<PeerId>,
    pub failed: Vec<(PeerId, TransportError)>,
}

impl FanOutResult {
    /// At least one send went through
    pub fn is_success(&self) -> bool {
        !self.succeeded.is_empty()
    }
}

/// Send `bytes` to every hop concurrently.
///
/// A failing peer never aborts the others; each failure is logged.
pub async fn fan_out(transport: &dyn Transport, hops: &[PeerId], bytes: &[u8]) -> FanOutResult {
    let sends = hops.iter().map(|peer| async move {
        let result = transport.send(peer, bytes.to_vec()).await;
        (peer.clone(), result)
    });

    let mut outcome = FanOutResult::default();
    for (peer, result) in join_all(sends).await {
        match result {
            Ok(()) => outcome.succeeded.push(peer),
            Err(err) => {
                warn!(peer_id = %peer, error = %err, "Send failed");
                outcome.failed.push((peer, err));
            }
        }
    }
    outcome
}
