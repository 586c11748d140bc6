//! shard — leaf agent.
//!
//! Holds one identity on the relay network on behalf of the hub. Two duties
//! run side by side: the hub link, which applies the hub's actions and
//! forwards reports, and the relay link, which speaks IRC.

pub mod agent;
pub mod hub_link;
pub mod relay;

pub use agent::Agent;
pub use relay::{RelayCommand, RelayLink, RelaySettings};
