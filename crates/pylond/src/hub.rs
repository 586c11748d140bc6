//! Shared hub state: canonical configs, the nickname registry, the session
//! table and the command registry.
//!
//! One [`Hub`] lives behind an `Arc` and is handed to every accept loop,
//! every session task and the console. All mutation goes through `&self`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;

use pylon_core::wire::{
    Action, ActionMessage, CommandCatalog, ControlMessage, HubConfig, Invocation, RelayConfig,
};
use pylon_core::Cipher;
use pylon_services::{CommandHandler, CommandRegistry, NickRegistry};

use crate::dispatch;
use crate::session::{listener, new_session_table, LeafHandle, SessionId, SessionTable};

/// Sender name for commands typed on the hub console.
pub const CONSOLE_SENDER: &str = "Console";
/// Channel name for commands typed on the hub console.
pub const CONSOLE_CHANNEL: &str = "Hub";

/// Who a command is executed for. Nickname commands need a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Console,
    Leaf(SessionId),
}

impl Origin {
    pub fn session(self) -> Option<SessionId> {
        match self {
            Self::Leaf(id) => Some(id),
            Self::Console => None,
        }
    }
}

/// Outcome of one console broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("no listener could be bound")]
    NoListeners,
    #[error("all accept loops stopped")]
    ListenersClosed,
}

pub struct Hub {
    cipher: Arc<Cipher>,
    hub_config: RwLock<HubConfig>,
    relay_config: RwLock<RelayConfig>,
    nicks: NickRegistry,
    sessions: SessionTable,
    registry: CommandRegistry,
    next_session: AtomicU64,
}

impl Hub {
    /// `handlers` are consulted after the built-ins, in the given order.
    pub fn new(
        cipher: Arc<Cipher>,
        hub_config: HubConfig,
        relay_config: RelayConfig,
        handlers: impl IntoIterator<Item = Arc<dyn CommandHandler>>,
    ) -> Self {
        let mut registry = dispatch::builtin_registry();
        for handler in handlers {
            registry.register(handler);
        }
        Self {
            cipher,
            hub_config: RwLock::new(hub_config),
            relay_config: RwLock::new(relay_config),
            nicks: NickRegistry::new(),
            sessions: new_session_table(),
            registry,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn cipher(&self) -> Arc<Cipher> {
        self.cipher.clone()
    }

    pub fn nicks(&self) -> &NickRegistry {
        &self.nicks
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> CommandCatalog {
        self.registry.catalog()
    }

    pub async fn hub_config(&self) -> HubConfig {
        self.hub_config.read().await.clone()
    }

    /// Read-modify-write the canonical hub config under one write lock.
    /// An `Err` from `update` leaves the stored config untouched.
    pub async fn update_hub_config<E>(
        &self,
        update: impl FnOnce(&mut HubConfig) -> Result<(), E>,
    ) -> Result<HubConfig, E> {
        let mut stored = self.hub_config.write().await;
        let mut config = stored.clone();
        update(&mut config)?;
        tracing::info!(address = %config.address, port = config.port, "hub config updated");
        *stored = config.clone();
        Ok(config)
    }

    pub async fn relay_config(&self) -> RelayConfig {
        self.relay_config.read().await.clone()
    }

    /// Read-modify-write the canonical relay config under one write lock.
    /// `update` returns whether it changed anything; the stored config is
    /// replaced only on `Ok(true)`. Returns the config now in force.
    pub async fn update_relay_config<E>(
        &self,
        update: impl FnOnce(&mut RelayConfig) -> Result<bool, E>,
    ) -> Result<RelayConfig, E> {
        let mut stored = self.relay_config.write().await;
        let mut config = stored.clone();
        if !update(&mut config)? {
            return Ok(config);
        }
        tracing::info!(
            server = %config.server,
            port = config.port,
            channel = %config.channel,
            use_ssl = config.use_ssl,
            "relay config updated"
        );
        *stored = config.clone();
        Ok(config)
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    pub(crate) fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register_session(&self, id: SessionId, handle: LeafHandle) {
        tracing::info!(
            session = id,
            peer = %handle.peer,
            nickname = handle.nickname.as_deref().unwrap_or("-"),
            "leaf registered"
        );
        self.sessions.insert(id, handle);
    }

    /// Drop a session and give its nickname back to the registry.
    pub fn remove_session(&self, id: SessionId) -> Option<LeafHandle> {
        let (_, handle) = self.sessions.remove(&id)?;
        if let Some(nick) = &handle.nickname {
            self.nicks.release(nick);
        }
        tracing::info!(
            session = id,
            peer = %handle.peer,
            remaining = self.sessions.len(),
            "leaf removed"
        );
        Some(handle)
    }

    pub fn session_nick(&self, id: SessionId) -> Option<String> {
        self.sessions.get(&id).and_then(|leaf| leaf.nickname.clone())
    }

    /// Allocate a unique name from `base`, record it on the session, then
    /// release whatever the session held before.
    ///
    /// Without a live session the name is not kept registered.
    pub fn reassign_nick(&self, origin: Origin, base: &str) -> String {
        let nickname = self.nicks.allocate_unique(base);
        let Some(mut leaf) = origin.session().and_then(|id| self.sessions.get_mut(&id)) else {
            self.nicks.release(&nickname);
            return nickname;
        };
        let previous = leaf.nickname.replace(nickname.clone());
        drop(leaf);

        if let Some(old) = previous.filter(|old| *old != nickname) {
            self.nicks.release(&old);
        }
        nickname
    }

    /// Release `explicit`, or the session's own nickname when not given.
    /// Returns the released name, or `None` when there was nothing to name.
    pub fn release_nick(&self, origin: Origin, explicit: Option<&str>) -> Option<String> {
        let mut leaf = origin.session().and_then(|id| self.sessions.get_mut(&id));
        let target = match explicit {
            Some(name) => name.to_string(),
            None => leaf.as_mut()?.nickname.clone()?,
        };
        if let Some(leaf) = leaf.as_mut() {
            if leaf.nickname.as_deref() == Some(target.as_str()) {
                leaf.nickname = None;
            }
        }
        drop(leaf);
        self.nicks.release(&target);
        Some(target)
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    pub async fn execute(&self, origin: Origin, invocation: &Invocation) -> ActionMessage {
        dispatch::execute(self, origin, invocation).await
    }

    /// React to one message from a leaf. Returns the reply, if any.
    pub async fn handle_control(
        &self,
        session: SessionId,
        message: ControlMessage,
    ) -> Option<ActionMessage> {
        match message {
            ControlMessage::Command(invocation) => {
                tracing::info!(
                    session,
                    sender = %invocation.sender,
                    channel = %invocation.channel,
                    command = %invocation.command,
                    "command from leaf"
                );
                Some(self.execute(Origin::Leaf(session), &invocation).await)
            }
            ControlMessage::NickUpdate { old_nick, new_nick } => {
                if let Some(old) = &old_nick {
                    self.nicks.release(old);
                    if let Some(mut leaf) = self.sessions.get_mut(&session) {
                        if leaf.nickname.as_ref() == Some(old) {
                            leaf.nickname = None;
                        }
                    }
                }
                let nickname = self.reassign_nick(Origin::Leaf(session), &new_nick?);
                tracing::info!(session, old = ?old_nick, new = %nickname, "nickname updated");
                Some(Action::SetNick { nickname }.into())
            }
            ControlMessage::Alert { message } => {
                tracing::warn!(session, alert = %message, "leaf alert");
                None
            }
            ControlMessage::Unrecognized => {
                tracing::warn!(session, "unrecognized control message ignored");
                None
            }
        }
    }

    /// Run a console command against every connected leaf.
    ///
    /// Nickname commands execute once per leaf. Everything else executes once
    /// and the same reply goes to all leaves. A leaf whose queue is gone is
    /// counted as failed and skipped.
    pub async fn broadcast(&self, command: &str, args: Vec<String>) -> BroadcastReport {
        let invocation = Invocation::new(CONSOLE_SENDER, CONSOLE_CHANNEL, command, args);
        let targets: Vec<(SessionId, mpsc::UnboundedSender<ActionMessage>)> = self
            .sessions
            .iter()
            .map(|leaf| (*leaf.key(), leaf.tx.clone()))
            .collect();

        let shared = if dispatch::is_session_scoped(command) {
            None
        } else {
            Some(self.execute(Origin::Console, &invocation).await)
        };

        let mut report = BroadcastReport::default();
        for (id, tx) in targets {
            if tx.is_closed() {
                tracing::warn!(session = id, command, "leaf queue closed, skipping");
                report.failed += 1;
                continue;
            }
            let reply = match &shared {
                Some(reply) => reply.clone(),
                None => self.execute(Origin::Leaf(id), &invocation).await,
            };
            match tx.send(reply) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    tracing::warn!(session = id, command, "broadcast to leaf failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    // ── Serving ──────────────────────────────────────────────────────────────

    /// Accept leaves on every listener until all accept loops stop.
    pub async fn serve(self: Arc<Self>, listeners: Vec<TcpListener>) -> Result<(), HubError> {
        if listeners.is_empty() {
            return Err(HubError::NoListeners);
        }
        tracing::info!(
            listeners = listeners.len(),
            key = %self.cipher.fingerprint(),
            "hub serving"
        );

        let mut accept_loops = JoinSet::new();
        for socket in listeners {
            accept_loops.spawn(listener::accept_loop(socket, self.clone()));
        }
        while let Some(joined) = accept_loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "accept loop aborted");
            }
        }
        Err(HubError::ListenersClosed)
    }
}
