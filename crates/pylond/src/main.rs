//! pylond — hub daemon.
//!
//! Usage: `pylond [port]`

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::io::BufReader;

use pylon_core::config::PylonConfig;
use pylon_core::Cipher;
use pylon_services::{CommandHandler, EchoService};

use pylond::hub::HubError;
use pylond::session::listener;
use pylond::{console, Hub};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PylonConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = PylonConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PylonConfig::default()
    });

    if let Some(arg) = std::env::args().nth(1) {
        config.hub.port = arg
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid port argument: {arg}"))?;
    }
    if config.relay.server.is_empty() {
        bail!(
            "relay server not configured; set [relay] server in {} or PYLON_RELAY__SERVER",
            PylonConfig::file_path().display()
        );
    }

    if config.hub_config().has_unspecified_address() {
        tracing::warn!(
            listen_address = %config.hub.listen_address,
            "no [hub] advertise_address; UPDATECONF port changes keep each leaf's own hub address"
        );
    }

    // One key for the whole process, reused across hub restarts.
    let cipher = Arc::new(Cipher::generate());
    tracing::info!(
        port = config.hub.port,
        relay = %config.relay.server,
        channel = %config.relay.channel,
        key = %cipher.fingerprint(),
        "pylond starting"
    );

    tokio::select! {
        r = supervise(config, cipher) => r,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    }
}

/// Run the hub, relaunching it after any failure except "nothing to listen on".
async fn supervise(config: PylonConfig, cipher: Arc<Cipher>) -> Result<()> {
    let restart_delay = config.restart_delay();
    loop {
        let handlers: [Arc<dyn CommandHandler>; 1] = [Arc::new(EchoService)];
        let hub = Arc::new(Hub::new(
            cipher.clone(),
            config.hub_config(),
            config.relay_config(),
            handlers,
        ));

        let listeners = listener::bind_listeners(&config.hub.listen_address, config.hub.port).await;
        let console_task = tokio::spawn(console::run(
            hub.clone(),
            BufReader::new(tokio::io::stdin()),
        ));

        let served = hub.clone().serve(listeners).await;
        console_task.abort();
        match served {
            Err(HubError::NoListeners) => {
                bail!("could not bind any listener on port {}", config.hub.port)
            }
            Err(e) => tracing::error!(error = %e, "hub stopped"),
            Ok(()) => tracing::warn!("hub returned"),
        }

        tracing::info!(delay_secs = restart_delay.as_secs(), "restarting hub");
        tokio::time::sleep(restart_delay).await;
    }
}
