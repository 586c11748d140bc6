use pretty_assertions::assert_eq;

use crate::*;

/// A fresh leaf registers with the allocated nickname and joins the channel.
#[tokio::test]
async fn leaf_registers_with_allocated_nickname() -> Result<()> {
    let fleet = Fleet::up().await?;

    assert!(fleet.hub.hub.nicks().contains(&fleet.nickname));
    let registered: Vec<Option<String>> = fleet
        .hub
        .hub
        .sessions()
        .iter()
        .map(|leaf| leaf.nickname.clone())
        .collect();
    assert_eq!(registered, vec![Some(fleet.nickname.clone())]);
    Ok(())
}

#[tokio::test]
async fn ping_is_answered_with_same_token() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    fleet.sync("abc123").await?;
    fleet.sync("second").await
}

/// Server password goes out before NICK, the channel key with JOIN.
#[tokio::test]
async fn passwords_are_presented() -> Result<()> {
    let relay = FakeRelay::bind().await?;
    let config = RelayConfig {
        password: Some("letmein".into()),
        channel_password: Some("chankey".into()),
        ..relay.config()
    };
    let hub = TestHub::start(config).await?;
    let _leaf = start_leaf(hub.address())?;
    let mut conn = relay.accept().await?;

    assert_eq!(read_line(&mut conn).await?, "PASS letmein");
    let nick = read_line(&mut conn).await?;
    assert!(nick.starts_with("NICK "), "{nick}");
    assert_eq!(read_line(&mut conn).await?, "USER leafbot 0 * :Leaf Bot");
    send_line(&mut conn, ":relay.test 422 x :MOTD File is missing").await?;
    assert_eq!(read_line(&mut conn).await?, format!("JOIN {CHANNEL} chankey"));
    Ok(())
}

/// "Nickname in use" is resolved through the hub's allocator.
#[tokio::test]
async fn nickname_collision_is_negotiated_with_hub() -> Result<()> {
    let relay = FakeRelay::bind().await?;
    let hub = TestHub::start(relay.config()).await?;
    let _leaf = start_leaf(hub.address())?;
    let mut conn = relay.accept().await?;

    let nick_line = read_line(&mut conn).await?;
    let nickname = nick_line.strip_prefix("NICK ").context("NICK")?.to_string();
    read_line(&mut conn).await?;

    send_line(&mut conn, &format!(":relay.test 433 * {nickname} :Nickname is already in use")).await?;
    let renamed = format!("{nickname}1");
    assert_eq!(read_line(&mut conn).await?, format!("NICK {renamed}"));

    send_line(&mut conn, &format!(":relay.test 376 {renamed} :End")).await?;
    assert_eq!(read_line(&mut conn).await?, format!("JOIN {CHANNEL}"));

    let nicks = hub.hub.nicks();
    wait_until(|| nicks.contains(&renamed) && !nicks.contains(&nickname)).await
}
