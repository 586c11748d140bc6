//! Leaf sessions: the table of connected leaves and the per-connection task.

pub mod connection;
pub mod handshake;
pub mod listener;

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use pylon_core::wire::ActionMessage;

pub type SessionId = u64;

/// Hub-side view of one connected leaf.
pub struct LeafHandle {
    pub peer: SocketAddr,
    /// Nickname this leaf currently holds in the registry.
    pub nickname: Option<String>,
    /// Queue drained by the session's writer task.
    pub tx: mpsc::UnboundedSender<ActionMessage>,
}

pub type SessionTable = Arc<DashMap<SessionId, LeafHandle>>;

pub fn new_session_table() -> SessionTable {
    Arc::new(DashMap::new())
}
