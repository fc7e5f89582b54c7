//! SNI whitelist in front of the certificate resolver.

use std::collections::HashSet;
use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::routing::matcher::normalize_host;

/// Refuses a certificate to any SNI name outside the configured hostnames,
/// so no issuance is ever attempted for them.
#[derive(Debug)]
pub struct HostWhitelist {
    hosts: HashSet<String>,
    inner: Arc<dyn ResolvesServerCert>,
}

impl HostWhitelist {
    pub fn new<I, S>(hosts: I, inner: Arc<dyn ResolvesServerCert>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hosts: hosts.into_iter().map(|h| normalize_host(h.as_ref())).collect(),
            inner,
        }
    }

    pub fn is_allowed(&self, server_name: &str) -> bool {
        self.hosts.contains(&normalize_host(server_name))
    }
}

impl ResolvesServerCert for HostWhitelist {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match client_hello.server_name() {
            Some(name) if self.is_allowed(name) => self.inner.resolve(client_hello),
            Some(name) => {
                tracing::debug!(server_name = %name, "Refusing certificate for unknown host");
                None
            }
            None => {
                tracing::debug!("Refusing handshake without SNI");
                None
            }
        }
    }
}
