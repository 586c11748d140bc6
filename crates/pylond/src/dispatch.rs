//! Routes invocations to the hub's built-in commands or the handler registry.
//!
//! Built-ins are looked up first. Anything else goes to the registered
//! [`CommandHandler`](pylon_services::CommandHandler)s in order, and if none
//! takes it the leaf gets `Unknown command: <name>`.

use pylon_core::wire::{Action, ActionMessage, HubConfig, Invocation, RelayConfig};
use pylon_services::{generate_nick, CommandRegistry};

use crate::hub::{Hub, Origin};

/// Built-in command names and their catalog descriptions.
pub const BUILTINS: &[(&str, &str)] = &[
    ("test", "Send a test message"),
    ("join", "Join a channel: join <#channel>"),
    ("leave", "Leave a channel: leave <#channel>"),
    ("nick", "Switch to a freshly generated nickname"),
    ("request_nick", "Allocate a unique nickname: request_nick [base]"),
    ("release_nick", "Release a nickname: release_nick [nickname]"),
    ("UPDATECONF", "Update hub address: UPDATECONF <address> <port> | <port> | <address>"),
    (
        "UPDATECONF.IRC",
        "Update relay settings: UPDATECONF.IRC <server> <port> <channel> [key] [-ssl]",
    ),
];

/// Registry pre-loaded with the built-in catalog entries.
pub fn builtin_registry() -> CommandRegistry {
    CommandRegistry::with_builtins(BUILTINS.iter().copied())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Test,
    Join,
    Leave,
    Nick,
    RequestNick,
    ReleaseNick,
    UpdateHub,
    UpdateRelay,
}

impl Builtin {
    pub fn parse(command: &str) -> Option<Self> {
        Some(match command {
            "test" => Self::Test,
            "join" => Self::Join,
            "leave" => Self::Leave,
            "nick" => Self::Nick,
            "request_nick" => Self::RequestNick,
            "release_nick" => Self::ReleaseNick,
            "UPDATECONF" => Self::UpdateHub,
            "UPDATECONF.IRC" => Self::UpdateRelay,
            _ => return None,
        })
    }

    /// Commands that act on one leaf's identity. A console broadcast runs
    /// these once per leaf instead of once for the whole fleet.
    pub fn session_scoped(self) -> bool {
        matches!(self, Self::Nick | Self::RequestNick | Self::ReleaseNick)
    }
}

pub fn is_session_scoped(command: &str) -> bool {
    Builtin::parse(command).is_some_and(Builtin::session_scoped)
}

/// Execute one invocation on behalf of `origin`.
pub async fn execute(hub: &Hub, origin: Origin, invocation: &Invocation) -> ActionMessage {
    let Some(builtin) = Builtin::parse(&invocation.command) else {
        return hub
            .registry()
            .dispatch(invocation)
            .unwrap_or_else(|| ActionMessage::error(format!("Unknown command: {}", invocation.command)));
    };

    match builtin {
        Builtin::Test => ActionMessage::send_message("Test message from hub"),

        Builtin::Join => match invocation.arg(0) {
            Some(channel) => Action::JoinChannel {
                channel: channel.to_string(),
            }
            .into(),
            None => ActionMessage::error("missing argument: channel"),
        },

        Builtin::Leave => match invocation.arg(0) {
            Some(channel) => Action::LeaveChannel {
                channel: channel.to_string(),
            }
            .into(),
            None => ActionMessage::error("missing argument: channel"),
        },

        Builtin::Nick => {
            let nickname = hub.reassign_nick(origin, &generate_nick());
            Action::ChangeNick { nickname }.into()
        }

        Builtin::RequestNick => {
            let base = invocation
                .arg(0)
                .map(str::to_string)
                .unwrap_or_else(generate_nick);
            let nickname = hub.reassign_nick(origin, &base);
            Action::SetNick { nickname }.into()
        }

        Builtin::ReleaseNick => match hub.release_nick(origin, invocation.arg(0)) {
            Some(nickname) => Action::NickReleased { nickname }.into(),
            None => ActionMessage::error("missing argument: nickname"),
        },

        Builtin::UpdateHub => {
            match hub
                .update_hub_config(|config| apply_hub_update(config, &invocation.args))
                .await
            {
                Ok(config) => Action::UpdateHubConfig { config }.into(),
                Err(e) => ActionMessage::error(e),
            }
        }

        Builtin::UpdateRelay => {
            match hub
                .update_relay_config(|config| apply_relay_update(config, &invocation.args))
                .await
            {
                Ok(config) => Action::UpdateIrcConfig { config }.into(),
                Err(e) => ActionMessage::error(e),
            }
        }
    }
}

// ── Config updates ───────────────────────────────────────────────────────────

/// `UPDATECONF` argument rules:
///
/// - two or more args: address and port
/// - one all-digit arg: port only
/// - one other arg: address only
/// - none: unchanged
pub fn apply_hub_update(config: &mut HubConfig, args: &[String]) -> Result<(), String> {
    match args {
        [address, port, ..] => {
            config.port = parse_port(port)?;
            config.address = address.clone();
        }
        [single] if single.chars().all(|c| c.is_ascii_digit()) => {
            config.port = parse_port(single)?;
        }
        [address] => config.address = address.clone(),
        [] => {}
    }
    Ok(())
}

/// `UPDATECONF.IRC <server> <port> <channel> [key] [-ssl]`.
///
/// Returns `Ok(false)` and leaves `config` alone with fewer than three args.
/// The channel key is cleared when not given, and TLS is on only when the
/// fifth arg is exactly `-ssl`.
pub fn apply_relay_update(config: &mut RelayConfig, args: &[String]) -> Result<bool, String> {
    let [server, port, channel, rest @ ..] = args else {
        return Ok(false);
    };
    config.port = parse_port(port)?;
    config.server = server.clone();
    config.channel = channel.clone();
    config.channel_password = rest.first().cloned();
    config.use_ssl = rest.get(1).is_some_and(|flag| flag == "-ssl");
    Ok(true)
}

fn parse_port(raw: &str) -> Result<u16, String> {
    raw.parse().map_err(|_| format!("invalid port: {raw}"))
}
