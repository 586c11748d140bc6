//! pylon-services — command handling shared by the hub and the leaves.
//!
//! The hub dispatches commands through a [`CommandRegistry`]; leaves use the
//! same registry for the passive per-line hooks. Nickname uniqueness across
//! the fleet lives in [`NickRegistry`], owned by the hub.

pub mod chat_log;
pub mod echo;
pub mod nick;
pub mod registry;
pub mod service;

pub use chat_log::ChatLog;
pub use echo::EchoService;
pub use nick::{generate_nick, NickRegistry};
pub use registry::CommandRegistry;
pub use service::{CommandHandler, Handled};
