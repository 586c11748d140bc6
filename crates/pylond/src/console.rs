//! Operator console: each stdin line is `<command> [args…]`, broadcast to
//! every connected leaf.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::hub::Hub;

/// Read commands until the input closes.
pub async fn run<R: AsyncBufRead + Unpin>(hub: Arc<Hub>, input: R) -> std::io::Result<()> {
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace().map(str::to_string);
        let Some(command) = words.next() else {
            continue;
        };
        let report = hub.broadcast(&command, words.collect()).await;
        tracing::info!(
            command = %command,
            delivered = report.delivered,
            failed = report.failed,
            "console broadcast"
        );
    }
    tracing::info!("console input closed");
    Ok(())
}
