//! ACME certificate automation.
//!
//! # Responsibilities
//! - Build the ACME state from the route hostnames (HTTP-01, directory cache)
//! - Expose a TLS acceptor whose resolver only serves whitelisted hosts
//! - Expose the challenge router mounted on the plain HTTP listener
//! - Drive issuance and renewal in the background
//!
//! # Design Decisions
//! - Certificates are requested lazily by the ACME state, cached on disk
//! - An empty hostname set is a startup error: nothing could ever be served

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use futures_util::StreamExt;
use rustls_acme::caches::DirCache;
use rustls_acme::{AcmeConfig as AcmeBuilder, AcmeState, UseChallenge};
use tokio::sync::broadcast;

use crate::certs::whitelist::HostWhitelist;
use crate::config::AcmeConfig;
use crate::net::ServerTls;

pub const ACME_CHALLENGE_ROUTE: &str = "/.well-known/acme-challenge/{challenge_token}";

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("no hostnames to request certificates for")]
    NoHostnames,
    #[error("cannot create certificate cache {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot load static certificate: {0}")]
    Static(#[source] std::io::Error),
}

pub struct CertificateManager {
    tls: ServerTls,
    challenge: Router,
    driver: AcmeDriver,
}

impl CertificateManager {
    pub fn new(hostnames: &[String], config: &AcmeConfig) -> Result<Self, CertError> {
        if hostnames.is_empty() {
            return Err(CertError::NoHostnames);
        }

        std::fs::create_dir_all(&config.cache_dir).map_err(|source| CertError::CacheDir {
            path: config.cache_dir.clone(),
            source,
        })?;

        let contacts: Vec<String> = config.contacts.iter().map(|c| mailto(c)).collect();
        let builder = AcmeBuilder::new(hostnames)
            .contact(contacts.iter().map(String::as_str))
            .cache(DirCache::new(config.cache_dir.clone()))
            .challenge_type(UseChallenge::Http01);
        let builder = match &config.directory_url {
            Some(url) => builder.directory(url),
            None => builder.directory_lets_encrypt(config.production),
        };
        let state = builder.state();

        let whitelist = HostWhitelist::new(hostnames, state.resolver());
        let mut server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(whitelist));
        server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        let acceptor = state.axum_acceptor(Arc::new(server_config));
        let challenge = Router::new().route_service(ACME_CHALLENGE_ROUTE, state.http01_challenge_tower_service());

        tracing::info!(
            hostnames = ?hostnames,
            cache_dir = %config.cache_dir.display(),
            production = config.production,
            "Certificate manager ready"
        );

        Ok(Self {
            tls: ServerTls::Acme(acceptor),
            challenge,
            driver: AcmeDriver { state },
        })
    }

    pub fn tls(&self) -> ServerTls {
        self.tls.clone()
    }

    /// Router answering HTTP-01 challenges.
    pub fn challenge_router(&self) -> Router {
        self.challenge.clone()
    }

    pub fn into_driver(self) -> AcmeDriver {
        self.driver
    }
}

/// Polls the ACME state so orders and renewals make progress.
pub struct AcmeDriver {
    state: AcmeState<std::io::Error>,
}

impl AcmeDriver {
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                event = self.state.next() => match event {
                    Some(Ok(ok)) => tracing::info!(event = ?ok, "ACME event"),
                    Some(Err(err)) => tracing::error!(error = ?err, "ACME error"),
                    None => break,
                },
            }
        }
        tracing::debug!("ACME driver stopped");
    }
}

fn mailto(contact: &str) -> String {
    if contact.starts_with("mailto:") {
        contact.to_string()
    } else {
        format!("mailto:{contact}")
    }
}
