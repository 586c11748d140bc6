//! One task per connected leaf.
//!
//! The task allocates the leaf's nickname, runs the welcome, registers the
//! session, and then reads control messages until the leaf goes away. Replies
//! and broadcasts share one outbound queue drained by a dedicated writer task,
//! so a console broadcast never blocks on a slow leaf's socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use pylon_core::frame::{LinkReader, LinkWriter};
use pylon_core::wire::{ActionMessage, ControlMessage};
use pylon_services::generate_nick;

use super::{handshake, LeafHandle, SessionId};
use crate::hub::Hub;

/// Serve one accepted connection to completion.
pub async fn serve(stream: TcpStream, peer: SocketAddr, hub: Arc<Hub>) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, error = %e, "set_nodelay failed");
    }
    let (read_half, write_half) = stream.into_split();
    serve_split(read_half, write_half, peer, hub).await
}

/// Transport-agnostic body of [`serve`].
pub async fn serve_split<R, W>(reader: R, writer: W, peer: SocketAddr, hub: Arc<Hub>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = hub.next_session_id();
    tracing::info!(session = id, %peer, "leaf connected");

    if let Err(e) = run(reader, writer, peer, id, &hub).await {
        tracing::warn!(session = id, %peer, error = %e, "leaf session failed");
    }
    hub.remove_session(id);
    tracing::info!(session = id, %peer, "leaf disconnected");
}

async fn run<R, W>(reader: R, writer: W, peer: SocketAddr, id: SessionId, hub: &Arc<Hub>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let nickname = hub.nicks().allocate_unique(&generate_nick());
    let writer = match handshake::welcome(writer, hub, &nickname).await {
        Ok(writer) => writer,
        Err(e) => {
            hub.nicks().release(&nickname);
            return Err(e).context("handshake failed");
        }
    };
    tracing::info!(session = id, %peer, nickname = %nickname, "handshake complete");

    let (tx, rx) = mpsc::unbounded_channel();
    hub.register_session(
        id,
        LeafHandle {
            peer,
            nickname: Some(nickname),
            tx: tx.clone(),
        },
    );

    // Dropping the set aborts the writer, whichever way this task ends.
    let mut writer_task = JoinSet::new();
    writer_task.spawn(write_loop(writer, rx, id));
    read_loop(LinkReader::new(reader, hub.cipher()), id, hub, &tx).await
}

async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: LinkReader<R>,
    id: SessionId,
    hub: &Hub,
    tx: &mpsc::UnboundedSender<ActionMessage>,
) -> Result<()> {
    while let Some(frame) = reader.recv::<ControlMessage>().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) if e.is_protocol() => {
                tracing::warn!(session = id, error = %e, "discarding malformed frame");
                continue;
            }
            Err(e) => return Err(e).context("leaf link read failed"),
        };
        if let Some(reply) = hub.handle_control(id, message).await {
            if tx.send(reply).is_err() {
                break;
            }
        }
    }
    Ok(())
}

async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: LinkWriter<W>,
    mut rx: mpsc::UnboundedReceiver<ActionMessage>,
    id: SessionId,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = writer.send(&message).await {
            tracing::warn!(session = id, error = %e, "write to leaf failed");
            return;
        }
    }
}
