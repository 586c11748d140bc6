//! Relay transport: plain TCP or TLS over TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    ring, verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{
    ClientConfig, DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme,
};
use tokio_rustls::TlsConnector;

use pylon_core::wire::RelayConfig;

use super::RelayLinkError;

/// Byte stream to the relay server, whichever transport carries it.
pub trait RelayIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RelayIo for T {}

pub type RelayStream = Box<dyn RelayIo>;

/// Build the TLS connector used for `use_ssl` relays.
///
/// With `verify` off, any certificate is accepted (signatures on the
/// handshake are still checked).
pub fn tls_connector(verify: bool) -> Result<TlsConnector, TlsError> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()?;

    let config = if verify {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate {
                algorithms: provider.signature_verification_algorithms,
            }))
            .with_no_client_auth()
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Open the relay connection, TLS included, within `limit`.
pub async fn connect(
    config: &RelayConfig,
    tls: &TlsConnector,
    limit: Duration,
) -> Result<RelayStream, RelayLinkError> {
    let target = format!("{}:{}", config.server, config.port);
    tokio::time::timeout(limit, open(config, tls))
        .await
        .map_err(|_| RelayLinkError::ConnectTimeout(target))?
}

async fn open(config: &RelayConfig, tls: &TlsConnector) -> Result<RelayStream, RelayLinkError> {
    let tcp = TcpStream::connect((config.server.as_str(), config.port)).await?;
    tcp.set_nodelay(true)?;
    if !config.use_ssl {
        return Ok(Box::new(tcp));
    }

    let name = ServerName::try_from(config.server.clone())
        .map_err(|_| RelayLinkError::ServerName(config.server.clone()))?;
    let stream = tls.connect(name, tcp).await?;
    Ok(Box::new(stream))
}

/// Certificate verifier that trusts every server.
#[derive(Debug)]
struct AcceptAnyCertificate {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
