//! Relay-link duty: one IRC identity, kept connected.
//!
//! [`RelayLink::run`] loops forever: connect, register, join, then serve the
//! channel until the connection fails or the endpoint changes. Transport
//! failures wait `reconnect_delay` and try again. The only way out is the
//! hub duty going away.
//!
//! The hub duty talks to this one through [`RelayCommand`]s. Reports flow
//! back as [`ControlMessage`]s on `to_hub`.

pub mod codec;
pub mod message;
pub mod session;
pub mod transport;

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

use pylon_core::config::{IdentitySection, Timing};
use pylon_core::wire::{ControlMessage, RelayConfig};
use pylon_services::CommandRegistry;

use codec::CodecError;

/// Instructions from the hub duty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayCommand {
    /// PRIVMSG to `channel`, or the configured channel.
    Say { channel: Option<String>, text: String },
    Join(String),
    Part(String),
    /// Take this nickname now.
    Nick(String),
    /// New relay settings. A `nickname` in them is the hub's intended identity.
    Reconfigure(RelayConfig),
}

#[derive(Debug, Error)]
pub enum RelayLinkError {
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
    #[error("invalid TLS server name: {0}")]
    ServerName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no traffic from relay for {0:?}")]
    IdleTimeout(Duration),
    #[error("relay closed the connection")]
    Closed,
    #[error("nickname negotiation gave up after {0} attempts")]
    NickNegotiationExhausted(u32),
    #[error("hub did not answer the nickname request")]
    NickNegotiationTimeout,
    #[error("hub link is gone")]
    HubGone,
}

/// Static relay-side settings for one leaf process.
#[derive(Clone)]
pub struct RelaySettings {
    pub identity: IdentitySection,
    pub timing: Timing,
    pub tls: TlsConnector,
}

pub struct RelayLink {
    settings: RelaySettings,
    /// Last configuration received, without a nickname.
    config: Option<RelayConfig>,
    /// Identity currently presented (or being registered).
    nickname: String,
    registry: CommandRegistry,
    to_hub: mpsc::UnboundedSender<ControlMessage>,
    commands: mpsc::UnboundedReceiver<RelayCommand>,
    /// Commands that arrived while another exchange had priority.
    deferred: VecDeque<RelayCommand>,
    /// "Nickname in use" rounds since the last accepted nickname.
    collisions: u32,
}

impl RelayLink {
    pub fn new(
        settings: RelaySettings,
        config: Option<RelayConfig>,
        nickname: String,
        registry: CommandRegistry,
        to_hub: mpsc::UnboundedSender<ControlMessage>,
        commands: mpsc::UnboundedReceiver<RelayCommand>,
    ) -> Self {
        Self {
            settings,
            config: config.map(|c| RelayConfig { nickname: None, ..c }),
            nickname,
            registry,
            to_hub,
            commands,
            deferred: VecDeque::new(),
            collisions: 0,
        }
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn config(&self) -> Option<&RelayConfig> {
        self.config.as_ref()
    }

    /// Keep the relay identity online until the hub duty goes away.
    pub async fn run(mut self) -> Result<(), RelayLinkError> {
        loop {
            let Some(config) = self.config.clone() else {
                tracing::info!("no relay configuration yet, waiting");
                let command = self.next_command().await?;
                self.absorb_offline(command)?;
                continue;
            };

            tracing::info!(
                server = %config.server,
                port = config.port,
                tls = config.use_ssl,
                nickname = %self.nickname,
                "connecting to relay"
            );
            let result = match transport::connect(
                &config,
                &self.settings.tls,
                self.settings.timing.relay_connect_timeout,
            )
            .await
            {
                Ok(stream) => self.serve(stream, config).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => tracing::info!("relay endpoint changed, reconnecting"),
                Err(RelayLinkError::HubGone) => return Err(RelayLinkError::HubGone),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delay_secs = self.settings.timing.reconnect_delay.as_secs(),
                        "relay link failed, retrying"
                    );
                    self.idle(self.settings.timing.reconnect_delay).await?;
                }
            }
        }
    }

    /// Next command, deferred ones first.
    async fn next_command(&mut self) -> Result<RelayCommand, RelayLinkError> {
        if let Some(command) = self.deferred.pop_front() {
            return Ok(command);
        }
        self.commands.recv().await.ok_or(RelayLinkError::HubGone)
    }

    /// Wait out a backoff while still tracking config and nickname changes.
    async fn idle(&mut self, delay: Duration) -> Result<(), RelayLinkError> {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                command = self.commands.recv() => {
                    let command = command.ok_or(RelayLinkError::HubGone)?;
                    self.absorb_offline(command)?;
                }
            }
        }
    }

    /// Apply a command while no relay connection exists.
    fn absorb_offline(&mut self, command: RelayCommand) -> Result<(), RelayLinkError> {
        match command {
            RelayCommand::Reconfigure(config) => {
                let config = self.adopt_config(config)?;
                self.config = Some(config);
            }
            RelayCommand::Nick(nickname) => self.nickname = nickname,
            other => tracing::debug!(command = ?other, "relay offline, command dropped"),
        }
        Ok(())
    }

    /// Strip the nickname from a pushed config. If it names a different
    /// identity, tell the hub so the allocator can move us over.
    fn adopt_config(&mut self, mut config: RelayConfig) -> Result<RelayConfig, RelayLinkError> {
        if let Some(implied) = config.nickname.take() {
            if implied != self.nickname {
                tracing::info!(old = %self.nickname, new = %implied, "configured nickname differs");
                self.report(ControlMessage::NickUpdate {
                    old_nick: Some(self.nickname.clone()),
                    new_nick: Some(implied),
                })?;
            }
        }
        Ok(config)
    }

    fn report(&self, message: ControlMessage) -> Result<(), RelayLinkError> {
        self.to_hub.send(message).map_err(|_| RelayLinkError::HubGone)
    }
}
