//! Passive chat observer: debug-logs every relay line a leaf sees.

use std::sync::atomic::{AtomicU64, Ordering};

use pylon_core::wire::Invocation;

use crate::service::{CommandHandler, Handled};

#[derive(Debug, Default)]
pub struct ChatLog {
    lines: AtomicU64,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chat lines observed since start.
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

impl CommandHandler for ChatLog {
    fn name(&self) -> &'static str {
        "chat_log"
    }

    fn commands(&self) -> Vec<(&'static str, &'static str)> {
        Vec::new()
    }

    fn handle(&self, _invocation: &Invocation) -> Handled {
        Handled::NotHandled
    }

    fn on_message(&self, sender: &str, channel: &str, text: &str) {
        let n = self.lines.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(sender, channel, text, line = n, "chat");
    }
}
