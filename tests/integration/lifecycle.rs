use pretty_assertions::assert_eq;
use tokio::io::{AsyncWriteExt, BufReader};

use pylond::console;

use crate::*;

#[tokio::test]
async fn console_broadcast_reaches_leaf() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let report = fleet.hub.hub.broadcast("join", vec!["#ops".into()]).await;
    assert_eq!((report.delivered, report.failed), (1, 0));
    assert_eq!(read_line(&mut fleet.conn).await?, "JOIN #ops");
    Ok(())
}

#[tokio::test]
async fn console_lines_are_broadcast() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let input: &[u8] = b"\n   \ntest\n";
    console::run(fleet.hub.hub.clone(), BufReader::new(input)).await?;
    assert_eq!(
        read_line(&mut fleet.conn).await?,
        format!("PRIVMSG {CHANNEL} :Test message from hub")
    );
    Ok(())
}

#[tokio::test]
async fn channel_change_parts_and_joins() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let port = fleet.relay.port.to_string();
    fleet
        .hub
        .hub
        .broadcast("UPDATECONF.IRC", vec!["127.0.0.1".into(), port, "#ops".into()])
        .await;

    assert_eq!(read_line(&mut fleet.conn).await?, format!("PART {CHANNEL}"));
    assert_eq!(read_line(&mut fleet.conn).await?, "JOIN #ops");
    assert_eq!(fleet.hub.hub.relay_config().await.channel, "#ops");
    Ok(())
}

#[tokio::test]
async fn endpoint_change_moves_leaf_to_new_relay() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let second = FakeRelay::bind().await?;
    fleet
        .hub
        .hub
        .broadcast(
            "UPDATECONF.IRC",
            vec!["127.0.0.1".into(), second.port.to_string(), CHANNEL.into()],
        )
        .await;

    assert_eq!(read_line(&mut fleet.conn).await?, "QUIT Reconfiguring");
    let mut conn = second.accept().await?;
    assert_eq!(register(&mut conn).await?, fleet.nickname);
    Ok(())
}

#[tokio::test]
async fn dropped_relay_connection_is_reestablished() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    fleet.conn.get_mut().shutdown().await?;
    fleet.conn = fleet.relay.accept().await?;

    assert_eq!(register(&mut fleet.conn).await?, fleet.nickname);
    fleet.sync("back").await
}

#[tokio::test]
async fn kicked_leaf_rejoins() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let nickname = fleet.nickname.clone();
    send_line(&mut fleet.conn, &format!(":op!op@host KICK {CHANNEL} {nickname} :out")).await?;
    assert_eq!(read_line(&mut fleet.conn).await?, format!("JOIN {CHANNEL}"));

    send_line(&mut fleet.conn, &format!(":{nickname}!leafbot@host JOIN {CHANNEL}")).await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    fleet.sync("settled").await
}

#[tokio::test]
async fn leaf_disconnect_releases_its_nickname() -> Result<()> {
    let fleet = Fleet::up().await?;
    fleet.leaf.abort();

    fleet.hub.wait_for_sessions(0).await?;
    let nicks = fleet.hub.hub.nicks();
    wait_until(|| !nicks.contains(&fleet.nickname)).await
}

#[tokio::test]
async fn two_leaves_get_distinct_nicknames() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let _second = start_leaf(fleet.hub.address())?;
    let mut conn = fleet.relay.accept().await?;
    let other = register(&mut conn).await?;
    fleet.hub.wait_for_sessions(2).await?;
    assert_ne!(other, fleet.nickname);

    let report = fleet.hub.hub.broadcast("test", vec![]).await;
    assert_eq!(report.delivered, 2);
    let expected = format!("PRIVMSG {CHANNEL} :Test message from hub");
    assert_eq!(read_line(&mut fleet.conn).await?, expected);
    assert_eq!(read_line(&mut conn).await?, expected);
    Ok(())
}

#[tokio::test]
async fn updateconf_moves_leaf_to_another_hub() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let second = TestHub::start(fleet.relay.config()).await?;
    fleet
        .hub
        .hub
        .broadcast("UPDATECONF", vec!["127.0.0.1".into(), second.port.to_string()])
        .await;

    second.wait_for_sessions(1).await?;
    let line = read_line(&mut fleet.conn).await?;
    let renamed = line.strip_prefix("NICK ").context("NICK")?.to_string();
    assert!(second.hub.nicks().contains(&renamed), "{renamed}");

    fleet.hub.wait_for_sessions(0).await?;
    let nicks = fleet.hub.hub.nicks();
    wait_until(|| !nicks.contains(&fleet.nickname)).await?;

    let report = second.hub.broadcast("test", vec![]).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(
        read_line(&mut fleet.conn).await?,
        format!("PRIVMSG {CHANNEL} :Test message from hub")
    );
    Ok(())
}

/// A hub that only knows its wildcard listen address pushes `0.0.0.0`.
/// The leaf keeps the address it already uses, so repeating the port is
/// a no-op rather than a relocation.
#[tokio::test]
async fn same_port_updateconf_from_wildcard_hub_keeps_leaf_in_place() -> Result<()> {
    let relay = FakeRelay::bind().await?;
    let hub = TestHub::start_on(relay.config(), 0, "0.0.0.0").await?;
    let _leaf = start_leaf(hub.address())?;
    let mut conn = relay.accept().await?;
    let nickname = register(&mut conn).await?;
    hub.wait_for_sessions(1).await?;

    let report = hub.hub.broadcast("UPDATECONF", vec![hub.port.to_string()]).await;
    assert_eq!(report.delivered, 1);
    hub.hub.broadcast("test", vec![]).await;

    assert_eq!(
        read_line(&mut conn).await?,
        format!("PRIVMSG {CHANNEL} :Test message from hub")
    );
    hub.wait_for_sessions(1).await?;
    assert!(hub.hub.nicks().contains(&nickname));
    Ok(())
}

#[tokio::test]
async fn leaf_reconnects_after_hub_restart() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    let port = fleet.hub.port;
    fleet.hub.stop().await;
    fleet.hub = TestHub::start_on(fleet.relay.config(), port, "127.0.0.1").await?;

    fleet.conn = fleet.relay.accept().await?;
    let nickname = register(&mut fleet.conn).await?;
    fleet.hub.wait_for_sessions(1).await?;
    assert!(fleet.hub.hub.nicks().contains(&nickname));
    fleet.sync("restarted").await
}
