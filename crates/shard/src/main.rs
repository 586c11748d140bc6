//! shard — leaf agent.
//!
//! Usage: `shard [hub_address] [hub_port]`

use std::sync::Arc;

use anyhow::{Context, Result};

use pylon_core::config::ShardConfig;
use pylon_services::{ChatLog, CommandRegistry};

use shard::relay::transport;
use shard::{Agent, RelaySettings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = ShardConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = ShardConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ShardConfig::default()
    });

    let mut args = std::env::args().skip(1);
    if let Some(address) = args.next() {
        config.hub.address = address;
    }
    if let Some(port) = args.next() {
        config.hub.port = port
            .parse()
            .with_context(|| format!("invalid hub port argument: {port}"))?;
    }

    let tls = transport::tls_connector(config.tls.verify).context("building TLS connector")?;
    let settings = RelaySettings {
        identity: config.identity.clone(),
        timing: config.timing(),
        tls,
    };

    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(ChatLog::new()));

    let hub = config.hub_config();
    tracing::info!(
        hub = %hub.authority(),
        trigger = %settings.identity.trigger,
        verify_tls = config.tls.verify,
        "shard starting"
    );

    let agent = Agent::new(settings, hub, registry);
    tokio::select! {
        r = agent.run() => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}
