//! # Blockswap Node
//!
//! Boots a single node from configuration and runs until Ctrl+C.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (`BX_LOG_LEVEL`, `BX_JSON_LOGS`, ...)
//! 2. Load configuration: the TOML file named by the first argument or
//!    `BX_CONFIG`, then `BX_*` overrides
//! 3. Start the node (offline: no transport is attached)
//! 4. Wait for Ctrl+C, then shut down and persist state

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bx_telemetry::{init_telemetry, TelemetryConfig};
use node_runtime::{Node, NodeConfig};
use shared_types::NullRouting;
use tracing::info;

/// Load configuration from file and environment.
fn load_config() -> Result<NodeConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BX_CONFIG").ok())
        .map(PathBuf::from);

    let mut config = match &path {
        Some(path) => NodeConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid BX_* environment override")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    let _guard = init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = load_config()?;
    info!(
        backend = %config.datastore.backend,
        path = %config.datastore.path.display(),
        "Loaded configuration"
    );

    let node = Node::start(config, None, Arc::new(NullRouting))
        .await
        .context("Failed to start node")?;
    node.wait_ready().await;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    node.shutdown().await.context("Shutdown failed")?;
    Ok(())
}
