//! # TLS Transport Layer
//!
//! Establishes the encrypted stream the client frames messages over.
//!
//! ## Responsibilities
//! - Open the TCP connection to `host:port`
//! - Run the TLS handshake, validating the server certificate against `host`
//! - Hand back the stream only once the handshake succeeded
//!
//! Trust comes from the platform's native roots plus any roots added through
//! [`TlsClientConfig`]. There is no certificate pinning and no way to skip
//! verification.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use rustls_pemfile::certs;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, instrument, warn};

use crate::config::TransportConfig;
use crate::error::{constants, ClientError, Result};

/// Encrypted stream produced by [`connect`]
pub type TlsTransport = TlsStream<TcpStream>;

/// TLS client configuration
#[derive(Debug, Clone)]
pub struct TlsClientConfig {
    server_name: String,
    native_roots: bool,
    ca_file: Option<String>,
    extra_roots: Vec<Vec<u8>>,
}

impl TlsClientConfig {
    /// Create a configuration validating the peer against `server_name` using the
    /// platform's native roots
    pub fn new<S: Into<String>>(server_name: S) -> Self {
        Self {
            server_name: server_name.into(),
            native_roots: true,
            ca_file: None,
            extra_roots: Vec::new(),
        }
    }

    /// Build from the transport section of the client settings
    pub fn from_settings<S: Into<String>>(server_name: S, transport: &TransportConfig) -> Self {
        Self {
            server_name: server_name.into(),
            native_roots: transport.native_roots,
            ca_file: transport.ca_file.clone(),
            extra_roots: Vec::new(),
        }
    }

    /// Do not load the platform's native roots
    pub fn without_native_roots(mut self) -> Self {
        self.native_roots = false;
        self
    }

    /// Trust the certificates in a PEM bundle in addition to the other roots
    pub fn with_ca_file<S: Into<String>>(mut self, path: S) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Trust a DER-encoded certificate in addition to the other roots
    pub fn with_root_certificate(mut self, der: Vec<u8>) -> Self {
        self.extra_roots.push(der);
        self
    }

    /// Name the server certificate is validated against
    pub fn server_name_str(&self) -> &str {
        &self.server_name
    }

    /// Build the root store from every configured source
    fn root_store(&self) -> Result<RootCertStore> {
        let mut root_store = RootCertStore::empty();

        if self.native_roots {
            let native_certs = rustls_native_certs::load_native_certs()
                .map_err(|e| ClientError::Tls(format!("Failed to load native certs: {e}")))?;
            let native: Vec<Vec<u8>> = native_certs.into_iter().map(|c| c.0).collect();
            let (added, ignored) = root_store.add_parsable_certificates(&native);
            debug!(added, ignored, "Loaded native root certificates");
        }

        if let Some(path) = &self.ca_file {
            let ca_file = File::open(path)
                .map_err(|e| ClientError::Tls(format!("Failed to open CA file: {e}")))?;
            let mut reader = BufReader::new(ca_file);
            let ca_certs = certs(&mut reader)
                .map_err(|_| ClientError::Tls("Failed to parse CA certificate".into()))?;

            if ca_certs.is_empty() {
                return Err(ClientError::Tls(format!("No certificates found in {path}")));
            }

            for cert in ca_certs {
                root_store.add(&Certificate(cert)).map_err(|e| {
                    ClientError::Tls(format!("Failed to add CA cert to root store: {e}"))
                })?;
            }
        }

        for der in &self.extra_roots {
            root_store.add(&Certificate(der.clone())).map_err(|e| {
                ClientError::Tls(format!("Failed to add cert to root store: {e}"))
            })?;
        }

        if root_store.is_empty() {
            warn!("Root store is empty; every server certificate will be rejected");
        }

        Ok(root_store)
    }

    /// Load the rustls client configuration
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(self.root_store()?)
            .with_no_client_auth();
        Ok(config)
    }

    /// Get the server name as a rustls::ServerName
    pub fn server_name(&self) -> Result<ServerName> {
        ServerName::try_from(self.server_name.as_str())
            .map_err(|_| ClientError::Tls(format!("Invalid server name: {}", self.server_name)))
    }
}

/// Connect to `host:port` and complete the TLS handshake.
///
/// Every failure (resolution, TCP, TLS configuration, handshake) is returned as
/// [`ClientError::Connection`]. Nothing is retried.
#[instrument(skip(config), fields(server_name = %config.server_name))]
pub async fn connect(host: &str, port: u16, config: &TlsClientConfig) -> Result<TlsTransport> {
    let tls_config = config.load_client_config().map_err(ClientError::connection)?;
    let domain = config.server_name().map_err(ClientError::connection)?;
    let connector = TlsConnector::from(Arc::new(tls_config));

    let stream = TcpStream::connect((host, port))
        .await
        .map_err(ClientError::connection)?;
    stream.set_nodelay(true).map_err(ClientError::connection)?;

    let peer = stream.peer_addr().ok();
    debug!(?peer, "TCP connection established");

    let tls_stream = connector
        .connect(domain, stream)
        .await
        .map_err(ClientError::connection)?;

    info!(?peer, "TLS handshake complete");
    Ok(tls_stream)
}

/// Connect with an upper bound on resolution, TCP connect and handshake combined.
pub async fn connect_with_timeout(
    host: &str,
    port: u16,
    config: &TlsClientConfig,
    timeout: std::time::Duration,
) -> Result<TlsTransport> {
    match tokio::time::timeout(timeout, connect(host, port, config)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::connection(constants::ERR_CONNECT_TIMEOUT)),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_invalid_server_name() {
        let config = TlsClientConfig::new("not a host name").without_native_roots();
        assert!(matches!(config.server_name(), Err(ClientError::Tls(_))));
    }

    #[test]
    fn test_missing_ca_file() {
        let config = TlsClientConfig::new("localhost")
            .without_native_roots()
            .with_ca_file("/nonexistent/ca.pem");
        assert!(matches!(
            config.load_client_config(),
            Err(ClientError::Tls(_))
        ));
    }

    #[test]
    fn test_garbage_root_rejected() {
        let config = TlsClientConfig::new("localhost")
            .without_native_roots()
            .with_root_certificate(vec![1, 2, 3]);
        assert!(matches!(
            config.load_client_config(),
            Err(ClientError::Tls(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = TlsClientConfig::new("localhost").without_native_roots();
        let result = connect("127.0.0.1", port, &config).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
    }
}
