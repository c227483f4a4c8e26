//! TLS configuration and dialing for gateway connections

use crate::config::ServerConfig;
use crate::error::{Result, VpnError};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

/// Certificate verifier that accepts all certificates (self-signed gateways)
#[derive(Debug)]
struct AcceptAllVerifier {
    schemes: Vec<rustls::SignatureScheme>,
}

impl rustls::client::danger::ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.schemes.clone()
    }
}

/// TLS configuration shared by the HTTP exchange and the tunnel
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Build the client configuration for a gateway
    pub fn new(server: &ServerConfig) -> Result<Self> {
        let provider = super::crypto_provider();
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let client_config = if server.verify_certificate {
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            if let Some(ref ca_file) = server.ca_file {
                load_ca_file(&mut root_store, ca_file)?;
            }

            builder
                .with_root_certificates(root_store)
                .with_no_client_auth()
        } else {
            log::warn!("Gateway certificate verification is disabled");
            let verifier = AcceptAllVerifier {
                schemes: provider
                    .signature_verification_algorithms
                    .supported_schemes(),
            };
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth()
        };

        Ok(Self {
            client_config: Arc::new(client_config),
        })
    }

    /// Get the client configuration
    pub fn client_config(&self) -> Arc<ClientConfig> {
        self.client_config.clone()
    }

    /// Open a TLS connection to `hostname:port`
    pub async fn connect(&self, hostname: &str, port: u16) -> Result<TlsStream<TcpStream>> {
        let tcp = TcpStream::connect((hostname, port))
            .await
            .map_err(|e| VpnError::Network(format!("TCP connection failed: {e}")))?;
        tcp.set_nodelay(true)?;

        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| VpnError::Tls(format!("Invalid hostname: {e}")))?;

        TlsConnector::from(self.client_config())
            .connect(server_name, tcp)
            .await
            .map_err(|e| VpnError::Tls(format!("TLS handshake failed: {e}")))
    }
}

fn load_ca_file(root_store: &mut RootCertStore, path: &str) -> Result<()> {
    let file = File::open(path)
        .map_err(|e| VpnError::Config(format!("Cannot open CA file {path}: {e}")))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| VpnError::Config(format!("Invalid certificate in {path}: {e}")))?;
    if certs.is_empty() {
        return Err(VpnError::Config(format!("No certificates found in {path}")));
    }

    let (added, ignored) = root_store.add_parsable_certificates(certs);
    log::debug!("Loaded {added} trust anchors from {path} ({ignored} ignored)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::io::Write;

    #[test]
    fn test_verifying_config() {
        let config = Config::for_gateway("vpn.local", 4433);
        assert!(TlsConfig::new(&config.server).is_ok());
    }

    #[test]
    fn test_accept_all_config() {
        let mut config = Config::for_gateway("vpn.local", 4433);
        config.server.verify_certificate = false;
        assert!(TlsConfig::new(&config.server).is_ok());
    }

    #[test]
    fn test_missing_ca_file() {
        let mut config = Config::for_gateway("vpn.local", 4433);
        config.server.ca_file = Some("/nonexistent/ca.pem".to_string());
        assert!(matches!(
            TlsConfig::new(&config.server),
            Err(VpnError::Config(_))
        ));
    }

    #[test]
    fn test_ca_file_without_certificates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a certificate\n").unwrap();

        let mut config = Config::for_gateway("vpn.local", 4433);
        config.server.ca_file = Some(file.path().display().to_string());
        assert!(matches!(
            TlsConfig::new(&config.server),
            Err(VpnError::Config(_))
        ));
    }
}
