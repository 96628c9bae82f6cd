//! TLS connector for establishing encrypted connections.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::TlsConfig;
use crate::error::TlsError;
use crate::prelogin_wrapper::TlsPreloginWrapper;

/// Accepts any server certificate; only the handshake signatures are checked.
///
/// Installed when `TrustServerCertificate` is set, which exposes the
/// connection to man-in-the-middle attacks.
#[derive(Debug)]
struct AcceptAnyServerCert(WebPkiSupportedAlgorithms);

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self(rustls::crypto::ring::default_provider().signature_verification_algorithms)
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

/// TLS connector for SQL Server connections.
///
/// The handshake runs after PRELOGIN, tunnelled through
/// [`TlsPreloginWrapper`] (see [`connect_tunnelled`](Self::connect_tunnelled)).
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Create a new TLS connector with the given configuration.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = Self::build_client_config(&config)?;
        let inner = TokioTlsConnector::from(Arc::new(client_config));

        Ok(Self { config, inner })
    }

    /// Build the rustls client configuration.
    fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
        let versions = config.protocol_versions();

        if config.trust_server_certificate {
            tracing::warn!(
                "TrustServerCertificate is enabled - certificate validation is DISABLED. \
                 Connections are vulnerable to man-in-the-middle attacks."
            );

            let client_config = ClientConfig::builder_with_protocol_versions(&versions)
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
                .with_no_client_auth();

            return Ok(client_config);
        }

        let root_store = Self::build_root_store(config)?;
        Ok(ClientConfig::builder_with_protocol_versions(&versions)
            .with_root_certificates(root_store)
            .with_no_client_auth())
    }

    /// Build the root certificate store.
    fn build_root_store(config: &TlsConfig) -> Result<RootCertStore, TlsError> {
        let mut root_store = RootCertStore::empty();

        if config.root_certificates.is_empty() {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert in &config.root_certificates {
                root_store
                    .add(cert.clone())
                    .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
            }
        }

        Ok(root_store)
    }

    /// Run the handshake over `stream`.
    ///
    /// `server_name` is used for SNI and certificate validation unless the
    /// configuration overrides it.
    pub async fn connect<S>(&self, stream: S, server_name: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = self.config.server_name.as_deref().unwrap_or(server_name);

        let dns_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::InvalidServerName(server_name.to_string()))?;

        tracing::debug!(server_name = %server_name, "performing TLS handshake");

        let tls_stream = self
            .inner
            .connect(dns_name, stream)
            .await
            .map_err(|e| TlsError::HandshakeFailed(e.to_string()))?;

        tracing::debug!("TLS handshake completed successfully");

        Ok(tls_stream)
    }

    /// Run the handshake inside PRELOGIN packets over a plain stream.
    ///
    /// On return the tunnel is removed: the wrapper passes TLS records
    /// straight to `stream`.
    pub async fn connect_tunnelled<S>(
        &self,
        stream: S,
        server_name: &str,
        packet_size: usize,
    ) -> Result<TlsStream<TlsPreloginWrapper<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let wrapper = TlsPreloginWrapper::with_packet_size(stream, packet_size);
        let mut tls = self.connect(wrapper, server_name).await?;
        tls.get_mut().0.handshake_complete();
        Ok(tls)
    }

    /// Get the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn setup_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    #[test]
    fn test_default_config() {
        setup_crypto_provider();
        assert!(TlsConnector::new(TlsConfig::default()).is_ok());
    }

    #[test]
    fn test_trust_server_certificate() {
        setup_crypto_provider();
        let config = TlsConfig::new().trust_server_certificate(true);
        let connector = TlsConnector::new(config).unwrap();
        assert!(connector.config().trust_server_certificate);
    }

    #[test]
    fn test_rejects_garbage_root_certificate() {
        setup_crypto_provider();
        let config = TlsConfig::new().add_root_certificate(CertificateDer::from(vec![1, 2, 3]));
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::InvalidCertificate(_))
        ));
    }

    #[tokio::test]
    async fn test_tunnelled_client_hello_is_framed_as_prelogin() {
        use tds_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketType};
        use tokio::io::AsyncReadExt;

        setup_crypto_provider();
        let connector = TlsConnector::new(TlsConfig::new().trust_server_certificate(true)).unwrap();
        let (client, mut server) = tokio::io::duplex(16 * 1024);

        let handshake = tokio::spawn(async move {
            connector
                .connect_tunnelled(client, "localhost", 4096)
                .await
                .map(|_| ())
        });

        let mut header = [0u8; PACKET_HEADER_SIZE];
        server.read_exact(&mut header).await.unwrap();
        let header = PacketHeader::decode(&mut &header[..]).unwrap();
        assert_eq!(header.packet_type, PacketType::PreLogin);
        assert!(header.is_end_of_message());

        let mut record = vec![0u8; header.payload_length()];
        server.read_exact(&mut record).await.unwrap();
        // TLS handshake record
        assert_eq!(record[0], 0x16);

        drop(server);
        assert!(handshake.await.unwrap().is_err());
    }
}
