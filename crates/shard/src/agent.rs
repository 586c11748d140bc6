//! Leaf agent: the hub duty and the relay duty, supervised together.
//!
//! The hub duty owns the hub link. It turns each [`ActionMessage`] into a
//! [`RelayCommand`] for the relay duty and writes the relay duty's
//! [`ControlMessage`] reports back to the hub. Both run on one task; if
//! either fails the pair is torn down and the agent starts over.

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;

use pylon_core::config::Timing;
use pylon_core::wire::{Action, ActionMessage, ControlMessage, HubConfig};
use pylon_services::CommandRegistry;

use crate::hub_link::{self, TcpHubLink};
use crate::relay::{RelayCommand, RelayLink, RelaySettings};

pub struct Agent {
    settings: RelaySettings,
    /// Hub address, updated in place when the hub relocates us.
    hub: HubConfig,
    registry: CommandRegistry,
}

impl Agent {
    pub fn new(settings: RelaySettings, hub: HubConfig, registry: CommandRegistry) -> Self {
        Self {
            settings,
            hub,
            registry,
        }
    }

    /// Run forever, restarting after `reconnect_delay` whenever a duty fails.
    pub async fn run(mut self) -> Result<()> {
        let delay = self.settings.timing.reconnect_delay;
        loop {
            match self.run_once().await {
                Ok(()) => tracing::warn!("agent stopped"),
                Err(e) => tracing::error!(error = %format!("{e:#}"), "agent failed"),
            }
            tracing::info!(delay_secs = delay.as_secs(), "restarting agent");
            tokio::time::sleep(delay).await;
        }
    }

    /// Connect to the hub (retrying until it answers), then run both duties
    /// until one of them fails.
    pub async fn run_once(&mut self) -> Result<()> {
        let (link, welcome) = hub_link::connect_with_retry(&self.hub, &self.settings.timing).await;

        let (to_hub, reports) = mpsc::unbounded_channel();
        let (commands, relay_commands) = mpsc::unbounded_channel();
        let relay = RelayLink::new(
            self.settings.clone(),
            Some(welcome.config),
            welcome.nickname,
            self.registry.clone(),
            to_hub,
            relay_commands,
        );
        let duty = HubDuty {
            link,
            hub: &mut self.hub,
            timing: self.settings.timing,
            reports,
            commands,
        };

        tokio::try_join!(duty.run(), async {
            relay.run().await.context("relay link")
        })?;
        Ok(())
    }
}

// ── Hub duty ─────────────────────────────────────────────────────────────────

struct HubDuty<'a> {
    link: TcpHubLink,
    hub: &'a mut HubConfig,
    timing: Timing,
    reports: mpsc::UnboundedReceiver<ControlMessage>,
    commands: mpsc::UnboundedSender<RelayCommand>,
}

impl HubDuty<'_> {
    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                incoming = self.link.reader.recv::<ActionMessage>() => match incoming {
                    None => bail!("hub closed the link"),
                    Some(Err(e)) if e.is_protocol() => {
                        tracing::warn!(error = %e, "dropping undecodable hub message");
                    }
                    Some(Err(e)) => return Err(e).context("reading from hub"),
                    Some(Ok(message)) => self.apply(message).await?,
                },
                report = self.reports.recv() => {
                    let report = report.ok_or_else(|| anyhow!("relay link stopped"))?;
                    self.link.writer.send(&report).await.context("writing to hub")?;
                }
            }
        }
    }

    async fn apply(&mut self, message: ActionMessage) -> Result<()> {
        match route(message) {
            Route::Relay(command) => self
                .commands
                .send(command)
                .map_err(|_| anyhow!("relay link stopped")),
            Route::Relocate(config) => self.relocate(config).await,
            Route::Ignore => Ok(()),
        }
    }

    /// Move to a different hub if the address actually changed.
    async fn relocate(&mut self, pushed: HubConfig) -> Result<()> {
        let config = relocation_target(self.hub, pushed);
        if *self.hub == config {
            tracing::debug!(hub = %config.authority(), "hub config unchanged");
            return Ok(());
        }
        tracing::info!(from = %self.hub.authority(), to = %config.authority(), "hub relocated");
        *self.hub = config;

        let (link, welcome) = hub_link::connect_with_retry(self.hub, &self.timing).await;
        self.link = link;
        for command in [
            RelayCommand::Nick(welcome.nickname),
            RelayCommand::Reconfigure(welcome.config),
        ] {
            self.commands
                .send(command)
                .map_err(|_| anyhow!("relay link stopped"))?;
        }
        Ok(())
    }
}

/// The hub address to use after an `update_hub_config`. A wildcard address
/// only moves the port; the leaf keeps the address it already reaches the
/// hub on.
fn relocation_target(current: &HubConfig, pushed: HubConfig) -> HubConfig {
    if pushed.has_unspecified_address() {
        HubConfig {
            address: current.address.clone(),
            port: pushed.port,
        }
    } else {
        pushed
    }
}

/// Where one hub message goes.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Relay(RelayCommand),
    Relocate(HubConfig),
    Ignore,
}

fn route(message: ActionMessage) -> Route {
    let action = match message {
        ActionMessage::Action(action) => action,
        ActionMessage::Error { message } => {
            tracing::warn!(%message, "hub reported an error");
            return Route::Ignore;
        }
        ActionMessage::Unrecognized => {
            tracing::warn!("unrecognized message type from hub");
            return Route::Ignore;
        }
    };

    let command = match action {
        Action::SendMessage { message, channel } => RelayCommand::Say {
            channel,
            text: message,
        },
        Action::JoinChannel { channel } => RelayCommand::Join(channel),
        Action::LeaveChannel { channel } => RelayCommand::Part(channel),
        Action::ChangeNick { nickname } | Action::SetNick { nickname } => {
            RelayCommand::Nick(nickname)
        }
        Action::UpdateIrcConfig { config } => RelayCommand::Reconfigure(config),
        Action::UpdateHubConfig { config } => return Route::Relocate(config),
        Action::NickReleased { nickname } => {
            tracing::info!(%nickname, "hub released nickname");
            return Route::Ignore;
        }
        Action::Unrecognized => {
            tracing::warn!("unrecognized action from hub");
            return Route::Ignore;
        }
    };
    Route::Relay(command)
}
