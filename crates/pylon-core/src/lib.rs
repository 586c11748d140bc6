//! pylon-core — wire types, link framing, cipher and configuration shared by
//! the hub (`pylond`) and the leaf agent (`shard`).

pub mod config;
pub mod crypto;
pub mod frame;
pub mod wire;

pub use crypto::Cipher;
pub use frame::{FrameError, LinkReader, LinkWriter};
pub use wire::{
    Action, ActionMessage, CommandCatalog, ControlMessage, HubConfig, Invocation, RelayConfig,
};
