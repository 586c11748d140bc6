//! Capability contract for command handlers.
//!
//! Handlers are wired statically, in order, when the hub or leaf starts. Each
//! one contributes catalog entries, may answer commands, and sees every chat
//! line through a passive hook. The set never changes while a process runs.

use pylon_core::wire::{ActionMessage, Invocation};

/// Outcome of offering a command to one handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// The handler took the command; this is the reply.
    Action(ActionMessage),
    /// Not this handler's command. Dispatch moves on to the next one.
    NotHandled,
}

/// Trait for pluggable command handlers.
///
/// Intentionally synchronous. A handler that needs I/O should hand the work
/// off and reply with whatever acknowledgement fits.
pub trait CommandHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Command name → description entries merged into the catalog.
    fn commands(&self) -> Vec<(&'static str, &'static str)>;

    /// Offer one invocation to this handler.
    fn handle(&self, invocation: &Invocation) -> Handled;

    /// Called for every chat line, whether or not it was a command.
    fn on_message(&self, _sender: &str, _channel: &str, _text: &str) {}
}
