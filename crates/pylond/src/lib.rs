//! pylond — hub coordinator.
//!
//! Accepts leaf connections, hands each one the link key and the canonical
//! relay configuration, routes the commands leaves report, and broadcasts
//! console commands to the whole fleet.

pub mod console;
pub mod dispatch;
pub mod hub;
pub mod session;

pub use hub::{BroadcastReport, Hub, Origin};
