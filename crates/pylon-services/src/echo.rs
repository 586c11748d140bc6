//! `echo` — repeats its arguments back into the channel.

use pylon_core::wire::{Action, ActionMessage, Invocation};

use crate::service::{CommandHandler, Handled};

#[derive(Debug, Default)]
pub struct EchoService;

impl CommandHandler for EchoService {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn commands(&self) -> Vec<(&'static str, &'static str)> {
        vec![("echo", "Repeat the given words in the channel")]
    }

    fn handle(&self, invocation: &Invocation) -> Handled {
        if invocation.command != "echo" {
            return Handled::NotHandled;
        }
        if invocation.args.is_empty() {
            return Handled::Action(ActionMessage::error("missing argument: text"));
        }
        // Reply into the channel the command came from, unless that was the console.
        let channel = invocation
            .channel
            .starts_with(['#', '&'])
            .then(|| invocation.channel.clone());
        Handled::Action(ActionMessage::Action(Action::SendMessage {
            message: invocation.args.join(" "),
            channel,
        }))
    }
}
