//! One relay connection, from registration to teardown.
//!
//! Registering → awaiting welcome (376 / 422) → joined. PING is answered in
//! every state. A 433 starts a `request_nick` round trip with the hub. Being
//! kicked starts a bounded rejoin sequence that ends in an alert if the
//! channel stays closed.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::Framed;

use pylon_core::wire::{ControlMessage, Invocation, RelayConfig};

use super::codec::{Inbound, RelayCodec};
use super::message::{Message, ERR_NICKNAMEINUSE, ERR_NOMOTD, RPL_ENDOFMOTD};
use super::{RelayCommand, RelayLink, RelayLinkError};

type Irc<S> = Framed<S, RelayCodec>;

/// Channel membership after the initial JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Membership {
    Joined,
    Rejoining {
        channel: String,
        attempts: u32,
        next: Instant,
    },
    /// Rejoin attempts exhausted. No further automatic JOINs.
    GaveUp,
}

impl Membership {
    fn deadline(&self) -> Option<Instant> {
        match self {
            Self::Rejoining { next, .. } => Some(*next),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Reconnect,
}

impl RelayLink {
    /// Drive one connection. `Ok(())` means the endpoint changed and the
    /// caller should connect again right away.
    pub async fn serve<S>(&mut self, stream: S, mut active: RelayConfig) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut irc = Framed::new(stream, RelayCodec);
        self.collisions = 0;

        self.register(&mut irc, &active).await?;
        self.await_welcome(&mut irc, &active).await?;
        self.collisions = 0;

        tracing::info!(
            server = %active.server,
            channel = %active.channel,
            nickname = %self.nickname,
            "registered with relay, joining"
        );
        send(&mut irc, join(&active.channel, active.channel_password.as_deref())).await?;
        self.joined(&mut irc, &mut active).await
    }

    // ── Registration ─────────────────────────────────────────────────────────

    async fn register<S>(&mut self, irc: &mut Irc<S>, config: &RelayConfig) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(password) = &config.password {
            send(irc, Message::new("PASS", [password.as_str()])).await?;
        }
        send(irc, Message::new("NICK", [self.nickname.as_str()])).await?;
        let identity = &self.settings.identity;
        send(
            irc,
            Message::new(
                "USER",
                [identity.username.as_str(), "0", "*", identity.realname.as_str()],
            ),
        )
        .await
    }

    async fn await_welcome<S>(&mut self, irc: &mut Irc<S>, config: &RelayConfig) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = self.settings.timing.relay_idle_timeout;
        loop {
            let message = match tokio::time::timeout(idle, irc.next()).await {
                Err(_) => return Err(RelayLinkError::IdleTimeout(idle)),
                Ok(next) => match accept(next)? {
                    Some(message) => message,
                    None => continue,
                },
            };
            match message.command.as_str() {
                "PING" => pong(irc, &message).await?,
                RPL_ENDOFMOTD | ERR_NOMOTD => return Ok(()),
                ERR_NICKNAMEINUSE => self.negotiate_nick(irc, config).await?,
                _ => {}
            }
        }
    }

    /// Ask the hub for a free nickname and switch to it.
    async fn negotiate_nick<S>(&mut self, irc: &mut Irc<S>, config: &RelayConfig) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let cap = self.settings.timing.nick_negotiation_attempts;
        self.collisions += 1;
        if self.collisions > cap {
            self.report(ControlMessage::alert(format!(
                "nickname negotiation for {} failed after {cap} attempts",
                self.nickname
            )))?;
            return Err(RelayLinkError::NickNegotiationExhausted(cap));
        }

        tracing::warn!(nickname = %self.nickname, attempt = self.collisions, "nickname in use, asking hub");
        self.report(ControlMessage::Command(Invocation::new(
            self.nickname.clone(),
            config.channel.clone(),
            "request_nick",
            vec![self.nickname.clone()],
        )))?;

        let deadline = Instant::now() + self.settings.timing.hub_read_timeout;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    self.report(ControlMessage::alert(format!(
                        "hub did not answer nickname request for {}",
                        self.nickname
                    )))?;
                    return Err(RelayLinkError::NickNegotiationTimeout);
                }
                command = self.commands.recv() => {
                    match command.ok_or(RelayLinkError::HubGone)? {
                        RelayCommand::Nick(nickname) => return self.take_nick(irc, nickname).await,
                        other => self.deferred.push_back(other),
                    }
                }
                next = irc.next() => {
                    if let Some(message) = accept(next)? {
                        if message.command == "PING" {
                            pong(irc, &message).await?;
                        }
                    }
                }
            }
        }
    }

    async fn take_nick<S>(&mut self, irc: &mut Irc<S>, nickname: String) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::info!(old = %self.nickname, new = %nickname, "changing nickname");
        send(irc, Message::new("NICK", [nickname.as_str()])).await?;
        self.nickname = nickname;
        Ok(())
    }

    // ── Joined ───────────────────────────────────────────────────────────────

    async fn joined<S>(&mut self, irc: &mut Irc<S>, active: &mut RelayConfig) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut membership = Membership::Joined;
        loop {
            while let Some(command) = self.deferred.pop_front() {
                if self.apply(irc, command, active, &mut membership).await? == Flow::Reconnect {
                    return Ok(());
                }
            }

            let rejoin_at = membership.deadline();
            tokio::select! {
                next = irc.next() => {
                    if let Some(message) = accept(next)? {
                        self.on_message(irc, message, active, &mut membership).await?;
                    }
                }
                command = self.commands.recv() => {
                    let command = command.ok_or(RelayLinkError::HubGone)?;
                    if self.apply(irc, command, active, &mut membership).await? == Flow::Reconnect {
                        return Ok(());
                    }
                }
                _ = tokio::time::sleep_until(rejoin_at.unwrap_or_else(Instant::now)), if rejoin_at.is_some() => {
                    self.rejoin_tick(irc, active, &mut membership).await?;
                }
            }
        }
    }

    async fn on_message<S>(
        &mut self,
        irc: &mut Irc<S>,
        message: Message,
        active: &RelayConfig,
        membership: &mut Membership,
    ) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match message.command.as_str() {
            "PING" => pong(irc, &message).await?,
            "PRIVMSG" => self.on_privmsg(&message)?,
            "KICK" => {
                let (Some(channel), Some(victim)) = (message.param(0), message.param(1)) else {
                    return Ok(());
                };
                if victim.eq_ignore_ascii_case(&self.nickname) {
                    tracing::warn!(channel, by = message.source_nick().unwrap_or("?"), "kicked");
                    *membership = Membership::Rejoining {
                        channel: channel.to_string(),
                        attempts: 0,
                        next: Instant::now() + self.settings.timing.rejoin_delay,
                    };
                }
            }
            "JOIN" => {
                let is_self = message
                    .source_nick()
                    .is_some_and(|nick| nick.eq_ignore_ascii_case(&self.nickname));
                let rejoined = matches!(
                    &*membership,
                    Membership::Rejoining { channel, .. }
                        if is_self && message.param(0).is_some_and(|c| c.eq_ignore_ascii_case(channel))
                );
                if rejoined {
                    tracing::info!(channel = message.param(0).unwrap_or_default(), "rejoined");
                    *membership = Membership::Joined;
                }
            }
            "NICK" => {
                if message.param(0) == Some(self.nickname.as_str()) {
                    self.collisions = 0;
                }
            }
            ERR_NICKNAMEINUSE => self.negotiate_nick(irc, active).await?,
            _ => {}
        }
        Ok(())
    }

    /// Feed the passive hooks, and report trigger-prefixed lines to the hub.
    fn on_privmsg(&self, message: &Message) -> Result<(), RelayLinkError> {
        let (Some(sender), Some(channel), Some(text)) =
            (message.source_nick(), message.param(0), message.param(1))
        else {
            return Ok(());
        };
        self.registry.observe(sender, channel, text);

        let Some(body) = text.strip_prefix(self.settings.identity.trigger.as_str()) else {
            return Ok(());
        };
        let (command, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        if command.is_empty() {
            return Ok(());
        }
        tracing::debug!(sender, channel, command, "command seen");
        self.report(ControlMessage::Command(Invocation::new(
            sender,
            channel,
            command,
            rest.split_whitespace().map(str::to_string).collect(),
        )))
    }

    async fn rejoin_tick<S>(
        &mut self,
        irc: &mut Irc<S>,
        active: &RelayConfig,
        membership: &mut Membership,
    ) -> Result<(), RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let Membership::Rejoining { channel, attempts, next } = membership else {
            return Ok(());
        };
        let max = self.settings.timing.rejoin_attempts;

        if *attempts >= max {
            let channel = channel.clone();
            *membership = Membership::GaveUp;
            tracing::error!(channel = %channel, attempts = max, "rejoin failed, giving up");
            return self.report(ControlMessage::alert(format!(
                "{} was kicked from {channel} and could not rejoin after {max} attempts; possibly banned",
                self.nickname
            )));
        }

        *attempts += 1;
        *next = Instant::now() + self.settings.timing.rejoin_delay;
        tracing::info!(channel = %channel, attempt = *attempts, "rejoining");
        let key = (*channel == active.channel)
            .then_some(active.channel_password.as_deref())
            .flatten();
        send(irc, join(channel, key)).await
    }

    async fn apply<S>(
        &mut self,
        irc: &mut Irc<S>,
        command: RelayCommand,
        active: &mut RelayConfig,
        membership: &mut Membership,
    ) -> Result<Flow, RelayLinkError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match command {
            RelayCommand::Say { channel, text } => {
                let target = channel.unwrap_or_else(|| active.channel.clone());
                for line in text.lines().filter(|l| !l.is_empty()) {
                    send(irc, Message::new("PRIVMSG", [target.as_str(), line])).await?;
                }
            }
            RelayCommand::Join(channel) => {
                let key = (channel == active.channel)
                    .then_some(active.channel_password.as_deref())
                    .flatten();
                send(irc, join(&channel, key)).await?;
            }
            RelayCommand::Part(channel) => {
                send(irc, Message::new("PART", [channel])).await?;
            }
            RelayCommand::Nick(nickname) => self.take_nick(irc, nickname).await?,
            RelayCommand::Reconfigure(config) => {
                let config = self.adopt_config(config)?;
                if !active.same_endpoint(&config) {
                    tracing::info!(
                        server = %config.server,
                        port = config.port,
                        tls = config.use_ssl,
                        "relay endpoint changed"
                    );
                    if let Err(e) = send(irc, Message::new("QUIT", ["Reconfiguring"])).await {
                        tracing::debug!(error = %e, "QUIT before reconnect failed");
                    }
                    self.config = Some(config);
                    return Ok(Flow::Reconnect);
                }
                if config.channel != active.channel {
                    tracing::info!(old = %active.channel, new = %config.channel, "switching channel");
                    send(irc, Message::new("PART", [active.channel.as_str()])).await?;
                    send(irc, join(&config.channel, config.channel_password.as_deref())).await?;
                    *membership = Membership::Joined;
                }
                *active = config.clone();
                self.config = Some(config);
            }
        }
        Ok(Flow::Continue)
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn send<S>(irc: &mut Irc<S>, message: Message) -> Result<(), RelayLinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::trace!(command = %message.command, "relay >>");
    irc.send(message).await?;
    Ok(())
}

async fn pong<S>(irc: &mut Irc<S>, ping: &Message) -> Result<(), RelayLinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send(irc, Message::new("PONG", ping.params.iter().map(String::as_str))).await
}

fn join(channel: &str, key: Option<&str>) -> Message {
    match key {
        Some(key) => Message::new("JOIN", [channel, key]),
        None => Message::new("JOIN", [channel]),
    }
}

/// Unwrap one stream item. Undecodable or malformed lines are logged and
/// yield `None`; end of stream and codec failures are errors.
fn accept(
    next: Option<Result<Inbound, super::codec::CodecError>>,
) -> Result<Option<Message>, RelayLinkError> {
    match next {
        None => Err(RelayLinkError::Closed),
        Some(Err(e)) => Err(e.into()),
        Some(Ok(Inbound::Message(message))) => {
            tracing::trace!(command = %message.command, "relay <<");
            Ok(Some(message))
        }
        Some(Ok(Inbound::Undecodable { len })) => {
            tracing::warn!(len, "dropping relay line that is not UTF-8");
            Ok(None)
        }
        Some(Ok(Inbound::Malformed { line, error })) => {
            tracing::warn!(%line, %error, "dropping malformed relay line");
            Ok(None)
        }
    }
}
