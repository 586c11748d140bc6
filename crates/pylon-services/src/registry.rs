//! Routes commands to registered handlers and builds the command catalog.

use std::sync::Arc;

use pylon_core::wire::{ActionMessage, CommandCatalog, Invocation};

use crate::service::{CommandHandler, Handled};

/// Ordered list of handlers plus the built-in catalog entries.
///
/// Built-in commands are executed by the owner (the hub); the registry only
/// knows their descriptions so the merged catalog is complete.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    builtins: CommandCatalog,
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose catalog starts from the given built-in entries.
    pub fn with_builtins<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            builtins: entries
                .into_iter()
                .map(|(name, desc)| (name.to_string(), desc.to_string()))
                .collect(),
            handlers: Vec::new(),
        }
    }

    /// Append a handler. Dispatch order is registration order.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        tracing::debug!(
            handler = handler.name(),
            commands = handler.commands().len(),
            "command handler registered"
        );
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Merged catalog. On a name clash built-ins win, then the earliest handler.
    pub fn catalog(&self) -> CommandCatalog {
        let mut catalog = CommandCatalog::new();
        for handler in &self.handlers {
            for (name, desc) in handler.commands() {
                catalog
                    .entry(name.to_string())
                    .or_insert_with(|| desc.to_string());
            }
        }
        for (name, desc) in &self.builtins {
            catalog.insert(name.clone(), desc.clone());
        }
        catalog
    }

    /// Offer the invocation to each handler in order. First taker wins.
    pub fn dispatch(&self, invocation: &Invocation) -> Option<ActionMessage> {
        for handler in &self.handlers {
            match handler.handle(invocation) {
                Handled::Action(reply) => {
                    tracing::debug!(
                        handler = handler.name(),
                        command = %invocation.command,
                        "command handled"
                    );
                    return Some(reply);
                }
                Handled::NotHandled => continue,
            }
        }
        None
    }

    /// Feed one chat line to every handler's passive hook.
    pub fn observe(&self, sender: &str, channel: &str, text: &str) {
        for handler in &self.handlers {
            handler.on_message(sender, channel, text);
        }
    }
}
