//! Hub side of the leaf handshake.
//!
//! 1. raw key bytes, unframed
//! 2. sealed [`RelayConfig`](pylon_core::RelayConfig) carrying the allocated nickname
//! 3. sealed command catalog
//!
//! The hub reads nothing from the leaf during the handshake.

use tokio::io::AsyncWrite;

use pylon_core::frame::{write_key, FrameError, LinkWriter};

use crate::hub::Hub;

/// Send the welcome sequence and return the framed writer for the session.
pub async fn welcome<W: AsyncWrite + Unpin>(
    mut writer: W,
    hub: &Hub,
    nickname: &str,
) -> Result<LinkWriter<W>, FrameError> {
    let cipher = hub.cipher();
    write_key(&mut writer, &cipher).await?;

    let mut link = LinkWriter::new(writer, cipher);
    link.send(&hub.relay_config().await.with_nickname(nickname))
        .await?;
    link.send(&hub.catalog()).await?;
    Ok(link)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use pylon_core::frame::{read_key, LinkReader};
    use pylon_core::wire::{CommandCatalog, HubConfig, RelayConfig};
    use pylon_core::Cipher;

    #[tokio::test]
    async fn welcome_sequence_is_key_config_catalog() {
        let relay = RelayConfig {
            server: "irc.example.org".into(),
            port: 6697,
            channel: "#test".into(),
            use_ssl: true,
            channel_password: Some("key".into()),
            password: None,
            nickname: None,
        };
        let hub = Hub::new(
            Arc::new(Cipher::generate()),
            HubConfig {
                address: "127.0.0.1".into(),
                port: 8888,
            },
            relay.clone(),
            [],
        );

        let (hub_side, mut leaf_side) = tokio::io::duplex(8192);
        welcome(hub_side, &hub, "Gengar404").await.unwrap();

        let key = read_key(&mut leaf_side).await.unwrap();
        assert_eq!(&key[..], hub.cipher().key());

        let mut reader = LinkReader::new(leaf_side, Arc::new(Cipher::from_key(&key).unwrap()));
        let config: RelayConfig = reader.recv().await.unwrap().unwrap();
        assert_eq!(config, relay.with_nickname("Gengar404"));

        let catalog: CommandCatalog = reader.recv().await.unwrap().unwrap();
        assert_eq!(catalog, hub.catalog());
    }
}
