use pretty_assertions::assert_eq;

use crate::*;

async fn say(fleet: &mut Fleet, text: &str) -> Result<()> {
    send_line(&mut fleet.conn, &format!(":alice!alice@host PRIVMSG {CHANNEL} :{text}")).await
}

#[tokio::test]
async fn test_command_round_trips_through_hub() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    say(&mut fleet, "!test").await?;
    assert_eq!(
        read_line(&mut fleet.conn).await?,
        format!("PRIVMSG {CHANNEL} :Test message from hub")
    );
    Ok(())
}

#[tokio::test]
async fn registered_handler_answers() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    say(&mut fleet, "!echo hello   world").await?;
    assert_eq!(
        read_line(&mut fleet.conn).await?,
        format!("PRIVMSG {CHANNEL} :hello world")
    );
    Ok(())
}

#[tokio::test]
async fn join_and_leave_commands_drive_the_relay() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    say(&mut fleet, "!join #other").await?;
    assert_eq!(read_line(&mut fleet.conn).await?, "JOIN #other");
    say(&mut fleet, "!leave #other").await?;
    assert_eq!(read_line(&mut fleet.conn).await?, "PART #other");
    Ok(())
}

/// Unknown commands come back as errors, which the leaf only logs.
#[tokio::test]
async fn unknown_command_produces_no_relay_traffic() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    say(&mut fleet, "!frobnicate now").await?;
    say(&mut fleet, "just chatting").await?;
    // Give the hub's error reply time to arrive before syncing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fleet.sync("quiet").await
}

#[tokio::test]
async fn nick_command_renames_the_leaf() -> Result<()> {
    let mut fleet = Fleet::up().await?;
    say(&mut fleet, "!nick").await?;

    let line = read_line(&mut fleet.conn).await?;
    let renamed = line.strip_prefix("NICK ").context("NICK")?.to_string();
    assert_ne!(renamed, fleet.nickname);

    let nicks = fleet.hub.hub.nicks();
    wait_until(|| nicks.contains(&renamed) && !nicks.contains(&fleet.nickname)).await
}
