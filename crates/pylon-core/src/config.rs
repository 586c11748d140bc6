//! Configuration for the hub (`pylond`) and the leaf agent (`shard`).
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PYLON_CONFIG / $SHARD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/pylon/{pylond,shard}.toml
//!   3. ~/.config/pylon/{pylond,shard}.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::wire::{HubConfig, RelayConfig};

// ── Retry / timeout constants ─────────────────────────────────────────────────

/// Wait before relaunching a failed agent, hub link or relay session.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Bound on each leaf-side handshake read, and on each nick negotiation.
pub const HUB_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on the relay TCP (and TLS) connect.
pub const RELAY_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Idle bound on relay reads while registering.
pub const RELAY_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Wait between rejoin attempts after being kicked.
pub const REJOIN_DELAY: Duration = Duration::from_secs(5);
/// Rejoin attempts before giving up and alerting the hub.
pub const REJOIN_ATTEMPTS: u32 = 3;
/// "Nickname in use" round trips before the relay session is abandoned.
pub const NICK_NEGOTIATION_ATTEMPTS: u32 = 5;
/// Wait before the hub supervisor relaunches the hub.
pub const RESTART_DELAY: Duration = Duration::from_secs(30);

pub const DEFAULT_HUB_PORT: u16 = 8888;
pub const DEFAULT_RELAY_PORT: u16 = 6667;
pub const DEFAULT_RELAY_TLS_PORT: u16 = 6697;

// ── Hub ───────────────────────────────────────────────────────────────────────

/// Top-level hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PylonConfig {
    pub hub: HubSection,
    pub relay: RelaySection,
    pub supervisor: SupervisorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    /// IPv4 address to listen on. The IPv6 wildcard is always tried as well.
    pub listen_address: String,
    pub port: u16,
    /// Address leaves are told to use in hub config updates. Falls back to
    /// `listen_address` when that is not a wildcard.
    pub advertise_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySection {
    /// Relay server hostname. Required; empty means "not configured".
    pub server: String,
    pub port: u16,
    pub channel: String,
    pub use_ssl: bool,
    pub channel_password: Option<String>,
    pub password: Option<String>,
    /// Base nickname pushed with configuration updates. Normally unset.
    pub nickname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub restart_delay_secs: u64,
}

impl Default for PylonConfig {
    fn default() -> Self {
        Self {
            hub: HubSection::default(),
            relay: RelaySection::default(),
            supervisor: SupervisorSection::default(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".into(),
            port: DEFAULT_HUB_PORT,
            advertise_address: None,
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_RELAY_PORT,
            channel: String::new(),
            use_ssl: false,
            channel_password: None,
            password: None,
            nickname: None,
        }
    }
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            restart_delay_secs: RESTART_DELAY.as_secs(),
        }
    }
}

impl PylonConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config: Self = load_file(&Self::file_path())?;
        config.apply_env_overrides();
        config.relay.normalize();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("PYLON_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("pylond.toml"))
    }

    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        write_default_if_missing(&Self::file_path(), &Self::default())
    }

    /// The hub address pushed to leaves. Stays a wildcard when neither an
    /// advertised nor a concrete listen address is configured; leaves keep
    /// their own address in that case.
    pub fn hub_config(&self) -> HubConfig {
        let address = self
            .hub
            .advertise_address
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(|| self.hub.listen_address.clone());
        HubConfig {
            address,
            port: self.hub.port,
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            server: self.relay.server.clone(),
            port: self.relay.port,
            channel: self.relay.channel.clone(),
            use_ssl: self.relay.use_ssl,
            channel_password: self.relay.channel_password.clone(),
            password: self.relay.password.clone(),
            nickname: self.relay.nickname.clone(),
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.supervisor.restart_delay_secs)
    }

    /// Apply PYLON_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PYLON_HUB__LISTEN_ADDRESS") {
            self.hub.listen_address = v;
        }
        if let Some(p) = env_parse("PYLON_HUB__PORT") {
            self.hub.port = p;
        }
        if let Ok(v) = std::env::var("PYLON_HUB__ADVERTISE_ADDRESS") {
            self.hub.advertise_address = Some(v);
        }
        if let Ok(v) = std::env::var("PYLON_RELAY__SERVER") {
            self.relay.server = v;
        }
        if let Some(p) = env_parse("PYLON_RELAY__PORT") {
            self.relay.port = p;
        }
        if let Ok(v) = std::env::var("PYLON_RELAY__CHANNEL") {
            self.relay.channel = v;
        }
        if let Ok(v) = std::env::var("PYLON_RELAY__USE_SSL") {
            self.relay.use_ssl = env_flag(&v);
        }
        if let Ok(v) = std::env::var("PYLON_RELAY__CHANNEL_PASSWORD") {
            self.relay.channel_password = Some(v);
        }
        if let Ok(v) = std::env::var("PYLON_RELAY__PASSWORD") {
            self.relay.password = Some(v);
        }
    }
}

impl RelaySection {
    /// TLS on the plaintext default port almost always means the TLS port.
    pub fn normalize(&mut self) {
        if self.use_ssl && self.port == DEFAULT_RELAY_PORT {
            self.port = DEFAULT_RELAY_TLS_PORT;
        }
    }
}

// ── Leaf ──────────────────────────────────────────────────────────────────────

/// Top-level leaf configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub hub: HubAddressSection,
    pub identity: IdentitySection,
    pub tls: TlsSection,
    pub timing: TimingSection,
}

/// Where to find the hub. Replaced at runtime by `update_hub_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubAddressSection {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub username: String,
    pub realname: String,
    /// Leading character that marks a chat line as a command.
    pub trigger: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    /// Verify relay certificates against the bundled web PKI roots.
    pub verify: bool,
}

/// Retry and timeout tuning, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub reconnect_delay_secs: u64,
    pub hub_read_timeout_secs: u64,
    pub relay_connect_timeout_secs: u64,
    pub relay_idle_timeout_secs: u64,
    pub rejoin_delay_secs: u64,
    pub rejoin_attempts: u32,
    pub nick_negotiation_attempts: u32,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            hub: HubAddressSection::default(),
            identity: IdentitySection::default(),
            tls: TlsSection::default(),
            timing: TimingSection::default(),
        }
    }
}

impl Default for HubAddressSection {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: DEFAULT_HUB_PORT,
        }
    }
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            username: "leafbot".into(),
            realname: "Leaf Bot".into(),
            trigger: "!".into(),
        }
    }
}

impl Default for TlsSection {
    fn default() -> Self {
        Self { verify: false }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: RECONNECT_DELAY.as_secs(),
            hub_read_timeout_secs: HUB_READ_TIMEOUT.as_secs(),
            relay_connect_timeout_secs: RELAY_CONNECT_TIMEOUT.as_secs(),
            relay_idle_timeout_secs: RELAY_IDLE_TIMEOUT.as_secs(),
            rejoin_delay_secs: REJOIN_DELAY.as_secs(),
            rejoin_attempts: REJOIN_ATTEMPTS,
            nick_negotiation_attempts: NICK_NEGOTIATION_ATTEMPTS,
        }
    }
}

/// Runtime form of [`TimingSection`]. Tests build it directly with short
/// durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub reconnect_delay: Duration,
    pub hub_read_timeout: Duration,
    pub relay_connect_timeout: Duration,
    pub relay_idle_timeout: Duration,
    pub rejoin_delay: Duration,
    pub rejoin_attempts: u32,
    pub nick_negotiation_attempts: u32,
}

impl Default for Timing {
    fn default() -> Self {
        TimingSection::default().into()
    }
}

impl From<TimingSection> for Timing {
    fn from(t: TimingSection) -> Self {
        Self {
            reconnect_delay: Duration::from_secs(t.reconnect_delay_secs),
            hub_read_timeout: Duration::from_secs(t.hub_read_timeout_secs),
            relay_connect_timeout: Duration::from_secs(t.relay_connect_timeout_secs),
            relay_idle_timeout: Duration::from_secs(t.relay_idle_timeout_secs),
            rejoin_delay: Duration::from_secs(t.rejoin_delay_secs),
            rejoin_attempts: t.rejoin_attempts,
            nick_negotiation_attempts: t.nick_negotiation_attempts,
        }
    }
}

impl ShardConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config: Self = load_file(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn file_path() -> PathBuf {
        std::env::var("SHARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("shard.toml"))
    }

    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        write_default_if_missing(&Self::file_path(), &Self::default())
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            address: self.hub.address.clone(),
            port: self.hub.port,
        }
    }

    pub fn timing(&self) -> Timing {
        self.timing.clone().into()
    }

    /// Apply SHARD_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SHARD_HUB__ADDRESS") {
            self.hub.address = v;
        }
        if let Some(p) = env_parse("SHARD_HUB__PORT") {
            self.hub.port = p;
        }
        if let Ok(v) = std::env::var("SHARD_IDENTITY__TRIGGER") {
            self.identity.trigger = v;
        }
        if let Ok(v) = std::env::var("SHARD_TLS__VERIFY") {
            self.tls.verify = env_flag(&v);
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("pylon")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_flag(v: &str) -> bool {
    v == "true" || v == "1"
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

fn load_file<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
}

fn write_default_if_missing<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf, ConfigError> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(value).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
    }
    Ok(path.to_path_buf())
}
