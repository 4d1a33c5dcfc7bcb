//! Configuration management for OffMesh nodes.
//!
//! Every section has defaults, so a TOML file only needs the keys it changes.

use crate::types::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Full node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub node: NodeConfig,
    pub router: RouterConfig,
    pub dispatcher: DispatcherConfig,
    pub multipath: MultiPathConfig,
    pub trust: TrustConfig,
    pub health: HealthConfig,
    pub gossip: GossipConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Local node identifier
    pub node_id: String,
    /// Scheduler resolution in milliseconds
    pub tick_interval_ms: u64,
    /// Capacity of the inbound transport event channel
    pub inbound_channel_capacity: usize,
    /// Directory holding the SQLite store, if any
    pub data_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "node-001".to_string(),
            tick_interval_ms: 100,
            inbound_channel_capacity: 1024,
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum hop budget of an envelope
    pub max_hops: u8,
    /// Bounded dedupe cache size
    pub dedupe_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_hops: 3,
            dedupe_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Maximum queued items
    pub capacity: usize,
    /// Items drained per dispatch tick
    pub batch_size: usize,
    /// Concurrent sends per tick
    pub max_in_flight: usize,
    /// Send attempts before an item is dropped
    pub max_attempts: u32,
    /// Dispatch period
    pub interval_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            batch_size: 10,
            max_in_flight: 5,
            max_attempts: 3,
            interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiPathConfig {
    /// Number of routes selected per send
    pub k_paths: usize,
    /// Routes containing a peer below this score are discarded
    pub blacklist_threshold: f64,
    /// Weight of the mean peer score
    pub score_weight: f64,
    /// Weight of the inverse hop count
    pub hop_weight: f64,
    /// Multiplier applied to the score of peers flagged slow
    pub slow_penalty: f64,
    /// Force single-path selection
    pub power_constrained: bool,
    /// Cached route lifetime
    pub route_cache_ttl_ms: u64,
}

impl Default for MultiPathConfig {
    fn default() -> Self {
        Self {
            k_paths: 3,
            blacklist_threshold: 0.10,
            score_weight: 0.7,
            hop_weight: 0.3,
            slow_penalty: 0.5,
            power_constrained: false,
            route_cache_ttl_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Score of a peer never observed
    pub neutral_score: f64,
    pub relay_success_reward: f64,
    pub relay_failure_penalty: f64,
    pub high_latency_penalty: f64,
    /// Latency above which a peer is penalised
    pub high_latency_threshold_ms: u64,
    /// Latency penalties stop at this score
    pub latency_penalty_floor: f64,
    pub invalid_signature_penalty: f64,
    pub double_spend_penalty: f64,
    pub rebroadcast_reward: f64,
    /// Rebroadcast rewards only apply above this score
    pub high_reputation_threshold: f64,
    /// Consecutive failures that trigger a blacklist
    pub failure_threshold: u32,
    pub blacklist_duration_ms: u64,
    pub decay: DecayConfig,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            neutral_score: 0.5,
            relay_success_reward: 0.02,
            relay_failure_penalty: 0.05,
            high_latency_penalty: 0.02,
            high_latency_threshold_ms: 500,
            latency_penalty_floor: 0.10,
            invalid_signature_penalty: 0.2,
            double_spend_penalty: 0.5,
            rebroadcast_reward: 0.01,
            high_reputation_threshold: 0.8,
            failure_threshold: 5,
            blacklist_duration_ms: 600_000,
            decay: DecayConfig::default(),
        }
    }
}

/// Exponential drift of scores back toward neutral
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Time for the distance to neutral to halve
    pub half_life_ms: u64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            half_life_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Health check period
    pub interval_ms: u64,
    /// Churn at or above this triggers aggressive healing
    pub aggressive_churn_threshold: f64,
    /// Replacement peers requested per dropped peer
    pub discovery_multiplier: usize,
    /// Latency above which a peer is flagged slow
    pub slow_latency_ms: u64,
    /// Slow flags and penalties only apply above this score
    pub slow_score_floor: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            aggressive_churn_threshold: 0.20,
            discovery_multiplier: 2,
            slow_latency_ms: 500,
            slow_score_floor: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Anti-entropy inventory period
    pub interval_ms: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self { interval_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Leading zero bits required in an entry hash. 0 disables the check.
    pub pow_difficulty_bits: u32,
    /// Nonce search bound when mining a local entry
    pub max_pow_iterations: u64,
    /// Rejected entries retained for audit
    pub audit_log_capacity: usize,
    /// Forked entries held for reconciliation
    pub conflict_capacity: usize,
    /// Reject transfers the sender cannot cover
    pub enforce_funds: bool,
    /// Opening balances in base units
    pub genesis_allocations: BTreeMap<String, Amount>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            pow_difficulty_bits: 8,
            max_pow_iterations: 1 << 24,
            audit_log_capacity: 256,
            conflict_capacity: 64,
            enforce_funds: false,
            genesis_allocations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl MeshConfig {
    /// Load and validate a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: MeshConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with the given node id
    pub fn for_node(node_id: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.node.node_id = node_id.into();
        config
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.node.node_id.trim().is_empty() {
            return Err(invalid("node.node_id", "must not be empty"));
        }
        if self.node.tick_interval_ms == 0 {
            return Err(invalid("node.tick_interval_ms", "must be positive"));
        }
        if self.router.max_hops == 0 {
            return Err(invalid("router.max_hops", "must be at least 1"));
        }
        if self.router.dedupe_capacity == 0 {
            return Err(invalid("router.dedupe_capacity", "must be at least 1"));
        }
        if self.dispatcher.capacity == 0 || self.dispatcher.batch_size == 0 {
            return Err(invalid("dispatcher", "capacity and batch_size must be positive"));
        }
        if self.dispatcher.max_in_flight == 0 || self.dispatcher.max_attempts == 0 {
            return Err(invalid(
                "dispatcher",
                "max_in_flight and max_attempts must be positive",
            ));
        }
        if self.multipath.k_paths == 0 {
            return Err(invalid("multipath.k_paths", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.multipath.blacklist_threshold) {
            return Err(invalid("multipath.blacklist_threshold", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.trust.neutral_score) {
            return Err(invalid("trust.neutral_score", "must lie in [0, 1]"));
        }
        if self.trust.decay.enabled && self.trust.decay.half_life_ms == 0 {
            return Err(invalid("trust.decay.half_life_ms", "must be positive when decay is enabled"));
        }
        if !(0.0..=1.0).contains(&self.health.aggressive_churn_threshold) {
            return Err(invalid("health.aggressive_churn_threshold", "must lie in [0, 1]"));
        }
        if self.ledger.pow_difficulty_bits > 64 {
            return Err(invalid("ledger.pow_difficulty_bits", "must not exceed 64"));
        }
        if self.ledger.genesis_allocations.values().any(|a| a.is_negative()) {
            return Err(invalid("ledger.genesis_allocations", "must not be negative"));
        }
        Ok(())
    }
}
