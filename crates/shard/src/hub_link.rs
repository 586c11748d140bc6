//! Leaf side of the hub link.
//!
//! The handshake mirrors the hub's welcome: the raw key, then one sealed
//! [`RelayConfig`] carrying the nickname allocated to us, then the sealed
//! command catalog. Every read is bounded by `hub_read_timeout`. A failed
//! attempt at any step starts over after `reconnect_delay`, forever.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use pylon_core::config::Timing;
use pylon_core::crypto::CryptoError;
use pylon_core::frame::{read_key, FrameError, LinkReader, LinkWriter};
use pylon_core::wire::{CommandCatalog, HubConfig, RelayConfig};
use pylon_core::Cipher;

#[derive(Debug, Error)]
pub enum HubLinkError {
    #[error("connect to {0} failed: {1}")]
    Connect(String, #[source] io::Error),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("hub closed the link while sending {0}")]
    Closed(&'static str),
    #[error("reading link key: {0}")]
    Key(#[source] io::Error),
    #[error("unusable link key: {0}")]
    Cipher(#[from] CryptoError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("welcome config carries no nickname")]
    MissingNickname,
}

/// What the hub told us during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    /// Relay settings, nickname removed.
    pub config: RelayConfig,
    /// Identity allocated to this leaf.
    pub nickname: String,
    pub catalog: CommandCatalog,
}

/// An established, keyed hub link.
pub struct HubLink<R, W> {
    pub reader: LinkReader<R>,
    pub writer: LinkWriter<W>,
}

pub type TcpHubLink = HubLink<OwnedReadHalf, OwnedWriteHalf>;

/// Run the leaf half of the handshake over an already open transport.
pub async fn handshake<R, W>(
    mut read: R,
    write: W,
    limit: Duration,
) -> Result<(HubLink<R, W>, Welcome), HubLinkError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let key = tokio::time::timeout(limit, read_key(&mut read))
        .await
        .map_err(|_| HubLinkError::Timeout("link key"))?
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => HubLinkError::Closed("link key"),
            _ => HubLinkError::Key(e),
        })?;
    let cipher = Arc::new(Cipher::from_key(&key)?);

    let mut reader = LinkReader::new(read, cipher.clone());
    let mut config: RelayConfig = recv_step(&mut reader, limit, "relay config").await?;
    let nickname = config.nickname.take().ok_or(HubLinkError::MissingNickname)?;
    let catalog: CommandCatalog = recv_step(&mut reader, limit, "command catalog").await?;

    tracing::debug!(
        key = %cipher.fingerprint(),
        nickname = %nickname,
        commands = catalog.len(),
        "hub handshake complete"
    );
    let link = HubLink {
        reader,
        writer: LinkWriter::new(write, cipher),
    };
    Ok((link, Welcome { config, nickname, catalog }))
}

async fn recv_step<R, T>(
    reader: &mut LinkReader<R>,
    limit: Duration,
    step: &'static str,
) -> Result<T, HubLinkError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match tokio::time::timeout(limit, reader.recv::<T>()).await {
        Err(_) => Err(HubLinkError::Timeout(step)),
        Ok(None) => Err(HubLinkError::Closed(step)),
        Ok(Some(result)) => Ok(result?),
    }
}

/// One connection attempt: TCP connect plus handshake.
pub async fn connect(hub: &HubConfig, limit: Duration) -> Result<(TcpHubLink, Welcome), HubLinkError> {
    let authority = hub.authority();
    let stream = tokio::time::timeout(limit, TcpStream::connect(&authority))
        .await
        .map_err(|_| HubLinkError::Timeout("tcp connect"))?
        .map_err(|e| HubLinkError::Connect(authority.clone(), e))?;
    stream
        .set_nodelay(true)
        .map_err(|e| HubLinkError::Connect(authority, e))?;

    let (read, write) = stream.into_split();
    handshake(read, write, limit).await
}

/// Connect, retrying every `reconnect_delay` until the hub answers.
pub async fn connect_with_retry(hub: &HubConfig, timing: &Timing) -> (TcpHubLink, Welcome) {
    let authority = hub.authority();
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match connect(hub, timing.hub_read_timeout).await {
            Ok((link, welcome)) => {
                tracing::info!(
                    hub = %authority,
                    attempt,
                    nickname = %welcome.nickname,
                    relay = %welcome.config.server,
                    channel = %welcome.config.channel,
                    "connected to hub"
                );
                return (link, welcome);
            }
            Err(e) => {
                tracing::warn!(
                    hub = %authority,
                    attempt,
                    error = %e,
                    delay_secs = timing.reconnect_delay.as_secs(),
                    "hub link failed, retrying"
                );
                tokio::time::sleep(timing.reconnect_delay).await;
            }
        }
    }
}
