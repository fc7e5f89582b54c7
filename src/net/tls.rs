//! TLS configuration for the HTTPS and WebSocket listeners.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use rustls_acme::axum::AxumAcceptor;

/// How a listener terminates TLS.
#[derive(Clone)]
pub enum ServerTls {
    /// Certificates issued on demand by the ACME manager.
    Acme(AxumAcceptor),
    /// Certificate and key loaded from PEM files.
    Static(RustlsConfig),
}

impl std::fmt::Debug for ServerTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerTls::Acme(_) => f.write_str("ServerTls::Acme"),
            ServerTls::Static(_) => f.write_str("ServerTls::Static"),
        }
    }
}

/// Install the process-wide rustls crypto provider. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> std::io::Result<RustlsConfig> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("certificate file not found: {}", cert_path.display()),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("private key file not found: {}", key_path.display()),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_config(&dir.path().join("cert.pem"), &dir.path().join("key.pem"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
        assert!(err.to_string().contains("cert.pem"));
    }
}
