//! TLS certificates for `--https`.

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

use crate::error::{CliError, Result};
use crate::ui;

/// Supplies the server certificate when serving over HTTPS.
pub trait CertificateProvider: Send + Sync {
    fn server_config(&self) -> Result<Arc<ServerConfig>>;
}

/// Certificate chain and private key read from PEM files.
#[derive(Debug, Clone)]
pub struct PemFileProvider {
    cert: PathBuf,
    key: PathBuf,
}

impl PemFileProvider {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }
}

impl CertificateProvider for PemFileProvider {
    fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let chain = CertificateDer::pem_file_iter(&self.cert)
            .and_then(|certs| certs.collect::<std::result::Result<Vec<_>, _>>())
            .map_err(|e| {
                CliError::Server(format!("cannot read {}: {}", self.cert.display(), e))
            })?;
        if chain.is_empty() {
            return Err(CliError::Server(format!(
                "{} contains no certificates",
                self.cert.display()
            )));
        }

        let key = PrivateKeyDer::from_pem_file(&self.key).map_err(|e| {
            CliError::Server(format!("cannot read {}: {}", self.key.display(), e))
        })?;

        let _ = rustls::crypto::ring::default_provider().install_default();
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| CliError::Server(format!("invalid certificate: {}", e)))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Arc::new(config))
    }
}

/// Build the acceptor, or fall back to plain HTTP with a warning.
pub fn acceptor(provider: Option<&dyn CertificateProvider>) -> Option<TlsAcceptor> {
    let provider = provider?;
    match provider.server_config() {
        Ok(config) => Some(TlsAcceptor::from(config)),
        Err(err) => {
            tracing::warn!("TLS unavailable: {}", err);
            ui::warning(&format!("HTTPS unavailable ({}), serving over HTTP", err));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_fall_back_to_http() {
        let dir = TempDir::new().unwrap();
        let provider = PemFileProvider::new(dir.path().join("cert.pem"), dir.path().join("key.pem"));

        assert!(provider.server_config().is_err());
        assert!(acceptor(Some(&provider)).is_none());
    }

    #[test]
    fn test_pem_without_certificates_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate\n").unwrap();
        std::fs::write(&key, "not a key\n").unwrap();

        let err = PemFileProvider::new(&cert, &key).server_config().unwrap_err();
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn test_no_provider_means_http() {
        assert!(acceptor(None).is_none());
    }
}
