//! Structured logging infrastructure for OffMesh nodes.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use offmesh_core::logging;
///
/// logging::init();
/// tracing::info!("Node started");
/// ```
pub fn init() {
    init_with_filter("info", false);
}

/// Initialize the logging system with JSON output for field deployments.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
///
/// # Example
/// ```no_run
/// use offmesh_core::logging;
///
/// logging::init_json();
/// tracing::info!(node_id = "relay-7", "Node started");
/// ```
pub fn init_json() {
    init_with_filter("info", true);
}

/// Initialize from a [`LoggingConfig`] section
pub fn init_from_config(config: &LoggingConfig) {
    init_with_filter(&config.level, config.json);
}

/// Initialize with an explicit default filter.
///
/// `RUST_LOG` still wins when set. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init_with_filter(default_level: &str, json: bool) {
    let filter = build_filter(default_level);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}

fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
