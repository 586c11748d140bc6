//! Pylon wire types — everything that crosses the hub ↔ leaf link.
//!
//! Each value is serialized as a JSON object, then sealed by [`crate::frame`]
//! into one base64 line. These types ARE the protocol: field names and tag
//! strings must stay stable or older leaves stop understanding the hub.
//!
//! Both message directions are closed sum types. A tag this build does not
//! know decodes to an explicit `Unrecognized` variant so the receiver can log
//! it, instead of failing the whole frame or silently succeeding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Length of the raw key the hub writes, unframed, right after accept.
pub const KEY_LEN: usize = 32;

/// Command name → human-readable description.
///
/// Pushed to every leaf once at handshake. Ordered so the JSON is stable.
pub type CommandCatalog = BTreeMap<String, String>;

// ── Configuration pushed to leaves ───────────────────────────────────────────

/// Relay-network settings. Owned by the hub; leaves hold the last pushed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub server: String,
    pub port: u16,
    pub channel: String,
    #[serde(default)]
    pub use_ssl: bool,
    /// Channel key sent with JOIN.
    #[serde(default)]
    pub channel_password: Option<String>,
    /// Server password sent as PASS before registration.
    #[serde(default)]
    pub password: Option<String>,
    /// In the handshake welcome: the nickname allocated to this leaf.
    /// In later updates: the hub-configured base nickname, usually absent.
    #[serde(default)]
    pub nickname: Option<String>,
}

impl RelayConfig {
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// True when switching from `self` to `other` needs a fresh TCP session.
    pub fn same_endpoint(&self, other: &RelayConfig) -> bool {
        self.server == other.server && self.port == other.port && self.use_ssl == other.use_ssl
    }
}

/// Where leaves reach the hub. A leaf's cached copy decides hub-link reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    pub address: String,
    pub port: u16,
}

impl HubConfig {
    /// Empty or a wildcard such as `0.0.0.0` / `::`. Such an address says
    /// nothing about where the hub can be reached.
    pub fn has_unspecified_address(&self) -> bool {
        let address = self.address.trim();
        address.is_empty()
            || address
                .parse::<std::net::IpAddr>()
                .is_ok_and(|ip| ip.is_unspecified())
    }

    pub fn authority(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

// ── Leaf → Hub ───────────────────────────────────────────────────────────────

/// One command invocation, wherever it came from (relay chat or hub console).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub sender: String,
    pub channel: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(
        sender: impl Into<String>,
        channel: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            channel: channel.into(),
            command: command.into(),
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Reports sent from a leaf to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// A trigger-prefixed chat line seen on the relay.
    Command(Invocation),
    /// The leaf's identity changed or should change.
    NickUpdate {
        #[serde(default)]
        old_nick: Option<String>,
        #[serde(default)]
        new_nick: Option<String>,
    },
    /// Something an operator should look at (e.g. suspected ban).
    Alert { message: String },
    #[serde(other)]
    Unrecognized,
}

impl ControlMessage {
    pub fn alert(message: impl Into<String>) -> Self {
        Self::Alert {
            message: message.into(),
        }
    }
}

// ── Hub → Leaf ───────────────────────────────────────────────────────────────

/// Side effects a leaf performs on its relay link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    SendMessage {
        message: String,
        /// Target channel; the leaf's configured channel when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
    JoinChannel { channel: String },
    LeaveChannel { channel: String },
    ChangeNick { nickname: String },
    SetNick { nickname: String },
    UpdateHubConfig { config: HubConfig },
    UpdateIrcConfig { config: RelayConfig },
    NickReleased { nickname: String },
    #[serde(other)]
    Unrecognized,
}

/// Messages sent from the hub to a leaf after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionMessage {
    Action(Action),
    Error { message: String },
    #[serde(other)]
    Unrecognized,
}

impl ActionMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn send_message(message: impl Into<String>) -> Self {
        Self::Action(Action::SendMessage {
            message: message.into(),
            channel: None,
        })
    }
}

impl From<Action> for ActionMessage {
    fn from(action: Action) -> Self {
        Self::Action(action)
    }
}
