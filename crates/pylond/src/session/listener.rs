//! Leaf listeners.
//!
//! The hub binds the IPv6 wildcard with IPV6_V6ONLY set and, separately, the
//! configured IPv4 address, both on the same port. Either bind may fail on
//! its own (no IPv6 stack, address in use); the hub runs with whatever came up.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use super::connection;
use crate::hub::Hub;

const BACKLOG: i32 = 1024;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bind every listener that can be bound. May return an empty list.
pub async fn bind_listeners(ipv4_address: &str, port: u16) -> Vec<TcpListener> {
    let mut listeners = Vec::with_capacity(2);

    match bind_ipv6(port) {
        Ok(listener) => {
            tracing::info!(addr = ?listener.local_addr().ok(), "listening (IPv6)");
            listeners.push(listener);
        }
        Err(e) => tracing::warn!(port, error = %e, "IPv6 listener unavailable"),
    }

    match TcpListener::bind((ipv4_address, port)).await {
        Ok(listener) => {
            tracing::info!(addr = ?listener.local_addr().ok(), "listening (IPv4)");
            listeners.push(listener);
        }
        Err(e) => tracing::warn!(address = ipv4_address, port, error = %e, "IPv4 listener unavailable"),
    }

    listeners
}

fn bind_ipv6(port: u16) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;
    socket.listen(BACKLOG).context("listen()")?;

    TcpListener::from_std(socket.into()).context("register listener")
}

/// Accept leaves forever. Accept errors are logged and retried.
///
/// Connection tasks belong to the loop: dropping it disconnects every leaf
/// it accepted.
pub async fn accept_loop(listener: TcpListener, hub: Arc<Hub>) {
    let mut connections = JoinSet::new();
    loop {
        while connections.try_join_next().is_some() {}
        match listener.accept().await {
            Ok((stream, peer)) => {
                connections.spawn(connection::serve(stream, peer, hub.clone()));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
            }
        }
    }
}
