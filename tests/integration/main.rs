//! Pylon integration test harness.
//!
//! Every test runs a real hub and a real leaf agent over loopback TCP, with
//! a scripted relay server standing in for the IRC network:
//!
//!   relay script ⇄ shard (Agent) ⇄ pylond (Hub)
//!
//!   cargo test --test integration
//!
//! All sockets bind 127.0.0.1:0, so tests can run in parallel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec};

use pylon_core::config::{IdentitySection, Timing};
use pylon_core::wire::{HubConfig, RelayConfig};
use pylon_core::Cipher;
use pylon_services::{ChatLog, CommandHandler, CommandRegistry, EchoService};
use pylond::Hub;
use shard::relay::transport;
use shard::{Agent, RelaySettings};

mod commands;
mod lifecycle;
mod registration;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound on any single wait in these tests.
pub const STEP: Duration = Duration::from_secs(10);

pub const CHANNEL: &str = "#test";

/// Short delays so retry paths finish quickly.
pub fn fast_timing() -> Timing {
    Timing {
        reconnect_delay: Duration::from_millis(100),
        hub_read_timeout: Duration::from_secs(5),
        relay_connect_timeout: Duration::from_secs(5),
        relay_idle_timeout: Duration::from_secs(30),
        rejoin_delay: Duration::from_millis(100),
        rejoin_attempts: 3,
        nick_negotiation_attempts: 5,
    }
}

/// Scripted relay server. Each accepted connection speaks plain lines.
pub struct FakeRelay {
    listener: TcpListener,
    pub port: u16,
}

pub type RelayConn = Framed<TcpStream, LinesCodec>;

impl FakeRelay {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn config(&self) -> RelayConfig {
        RelayConfig {
            server: "127.0.0.1".into(),
            port: self.port,
            channel: CHANNEL.into(),
            use_ssl: false,
            channel_password: None,
            password: None,
            nickname: None,
        }
    }

    pub async fn accept(&self) -> Result<RelayConn> {
        let (stream, _) = tokio::time::timeout(STEP, self.listener.accept())
            .await
            .context("no relay connection")??;
        Ok(Framed::new(stream, LinesCodec::new()))
    }
}

/// Next line from the leaf.
pub async fn read_line(conn: &mut RelayConn) -> Result<String> {
    match tokio::time::timeout(STEP, conn.next()).await {
        Err(_) => bail!("timed out waiting for a line from the leaf"),
        Ok(None) => bail!("leaf closed the relay connection"),
        Ok(Some(line)) => Ok(line?),
    }
}

pub async fn send_line(conn: &mut RelayConn, line: &str) -> Result<()> {
    conn.send(line).await?;
    Ok(())
}

/// Play the relay side of registration. Returns the nickname the leaf
/// registered with.
pub async fn register(conn: &mut RelayConn) -> Result<String> {
    let nick_line = read_line(conn).await?;
    let nickname = nick_line
        .strip_prefix("NICK ")
        .with_context(|| format!("expected NICK, got {nick_line:?}"))?
        .to_string();
    let user_line = read_line(conn).await?;
    if !user_line.starts_with("USER ") {
        bail!("expected USER, got {user_line:?}");
    }
    send_line(conn, &format!(":relay.test 001 {nickname} :Welcome")).await?;
    send_line(conn, &format!(":relay.test 376 {nickname} :End of /MOTD command.")).await?;
    let join = read_line(conn).await?;
    if join != format!("JOIN {CHANNEL}") {
        bail!("expected JOIN, got {join:?}");
    }
    Ok(nickname)
}

/// A hub listening on loopback, serving in the background.
pub struct TestHub {
    pub hub: Arc<Hub>,
    pub port: u16,
    task: JoinHandle<()>,
}

impl TestHub {
    pub async fn start(relay: RelayConfig) -> Result<Self> {
        Self::start_on(relay, 0, "127.0.0.1").await
    }

    /// Hub listening on loopback `port` (0 for any) that advertises
    /// `advertised` as its address in hub config updates.
    pub async fn start_on(relay: RelayConfig, port: u16, advertised: &str) -> Result<Self> {
        let listener = bind_loopback(port).await?;
        let port = listener.local_addr()?.port();
        let handlers: [Arc<dyn CommandHandler>; 1] = [Arc::new(EchoService)];
        let hub = Arc::new(Hub::new(
            Arc::new(Cipher::generate()),
            HubConfig {
                address: advertised.into(),
                port,
            },
            relay,
            handlers,
        ));
        let serving = hub.clone();
        let task = tokio::spawn(async move {
            let _ = serving.serve(vec![listener]).await;
        });
        Ok(Self { hub, port, task })
    }

    pub fn address(&self) -> HubConfig {
        HubConfig {
            address: "127.0.0.1".into(),
            port: self.port,
        }
    }

    /// Abort the hub. Its listener and every leaf link close with it.
    pub async fn stop(&mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }

    /// Wait until exactly `count` leaves are registered.
    pub async fn wait_for_sessions(&self, count: usize) -> Result<()> {
        wait_until(|| self.hub.sessions().len() == count)
            .await
            .with_context(|| format!("expected {count} sessions, have {}", self.hub.sessions().len()))
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind 127.0.0.1:`port`. A fixed port may still be held by a hub that is
/// shutting down, so that case is retried for up to [`STEP`].
async fn bind_loopback(port: u16) -> Result<TcpListener> {
    let deadline = tokio::time::Instant::now() + STEP;
    loop {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(listener),
            Err(_) if port != 0 && tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            Err(e) => return Err(e).with_context(|| format!("binding port {port}")),
        }
    }
}

/// Start a leaf agent pointed at `hub`.
pub fn start_leaf(hub: HubConfig) -> Result<JoinHandle<Result<()>>> {
    let settings = RelaySettings {
        identity: IdentitySection::default(),
        timing: fast_timing(),
        tls: transport::tls_connector(false)?,
    };
    let mut registry = CommandRegistry::new();
    registry.register(Arc::new(ChatLog::new()));
    Ok(tokio::spawn(Agent::new(settings, hub, registry).run()))
}

/// Poll `done` every 10ms until it holds or [`STEP`] passes.
pub async fn wait_until(mut done: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + STEP;
    while !done() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not reached within {STEP:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

/// Hub, relay script and one leaf, registered and joined.
pub struct Fleet {
    pub hub: TestHub,
    pub relay: FakeRelay,
    pub conn: RelayConn,
    pub nickname: String,
    pub leaf: JoinHandle<Result<()>>,
}

impl Fleet {
    pub async fn up() -> Result<Self> {
        let relay = FakeRelay::bind().await?;
        let hub = TestHub::start(relay.config()).await?;
        let leaf = start_leaf(hub.address())?;
        let mut conn = relay.accept().await?;
        let nickname = register(&mut conn).await?;
        hub.wait_for_sessions(1).await?;
        Ok(Self {
            hub,
            relay,
            conn,
            nickname,
            leaf,
        })
    }

    /// Prove the leaf has processed everything sent before: the next line
    /// it writes must be the answer to this PING.
    pub async fn sync(&mut self, token: &str) -> Result<()> {
        send_line(&mut self.conn, &format!("PING :{token}")).await?;
        let line = read_line(&mut self.conn).await?;
        if line != format!("PONG {token}") {
            bail!("expected PONG {token}, got {line:?}");
        }
        Ok(())
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        self.leaf.abort();
    }
}
