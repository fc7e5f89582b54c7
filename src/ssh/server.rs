//! SSH tunnel listener.
//!
//! # Responsibilities
//! - Load the host key, generating and persisting one when missing
//! - Accept TCP connections within the connection limit
//! - Drop denied peers before the SSH handshake
//! - Run one russh session per connection until it ends or shutdown
//!
//! # Design Decisions
//! - Deny check uses the socket peer only: there are no headers in SSH
//! - A failed handshake ends that connection, never the listener

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use russh::keys::ssh_key::{private::Ed25519Keypair, LineEnding};
use russh::keys::{decode_secret_key, PrivateKey};
use tokio::sync::broadcast;

use crate::config::SshRoutesConfig;
use crate::net::{TunnelTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::security::access_control::peer_ip;
use crate::security::DenyList;
use crate::ssh::forward::Forwarder;
use crate::ssh::handler::TunnelHandler;

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("cannot read host key {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write host key {path}: {source}")]
    WriteKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid host key: {0}")]
    DecodeKey(#[from] russh::keys::Error),
    #[error("cannot encode host key: {0}")]
    EncodeKey(#[from] russh::keys::ssh_key::Error),
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Read the host key at `path`, or create an Ed25519 key there.
pub async fn load_or_generate_host_key(path: &Path) -> Result<PrivateKey, SshError> {
    match tokio::fs::read_to_string(path).await {
        Ok(key) => Ok(decode_secret_key(&key, None)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "Host key not found, generating");
            let key = PrivateKey::from(Ed25519Keypair::from_seed(&rand::random::<[u8; 32]>()));
            let encoded = key.to_openssh(LineEnding::LF)?;

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| SshError::WriteKey {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
            tokio::fs::write(path, encoded.as_bytes())
                .await
                .map_err(|source| SshError::WriteKey {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(decode_secret_key(&encoded, None)?)
        }
        Err(source) => Err(SshError::ReadKey {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub struct SshServer {
    config: Arc<russh::server::Config>,
    forwarder: Arc<Forwarder>,
    deny_list: Arc<DenyList>,
    tracker: TunnelTracker,
}

impl SshServer {
    pub async fn new(
        routes: &SshRoutesConfig,
        deny_list: Arc<DenyList>,
        tracker: TunnelTracker,
        connect_timeout: Option<Duration>,
    ) -> Result<Self, SshError> {
        let key = load_or_generate_host_key(&routes.host_key_path).await?;
        let config = russh::server::Config {
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            inactivity_timeout: Some(Duration::from_secs(3_600)),
            keys: vec![key],
            ..Default::default()
        };

        Ok(Self {
            config: Arc::new(config),
            forwarder: Arc::new(Forwarder::new(routes.configs.clone(), routes.strategy, connect_timeout)),
            deny_list,
            tracker,
        })
    }

    /// Accept connections until shutdown. Per-connection failures are logged.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) -> Result<(), SshError> {
        tracing::info!(
            address = %listener.local_addr().map_err(ListenerError::Accept)?,
            max_connections = listener.max_connections(),
            "SSH listener starting"
        );

        loop {
            let (stream, peer, slot) = tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "SSH accept failed");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                },
            };

            let ip = peer_ip(peer);
            if self.deny_list.is_denied(&ip) {
                tracing::debug!(client = %ip, "Denied SSH client dropped");
                metrics::record_denied("ssh");
                drop(stream);
                continue;
            }

            let handler = TunnelHandler::new(peer, Arc::clone(&self.forwarder), self.tracker.clone());
            let config = Arc::clone(&self.config);
            let mut shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                let _slot = slot;
                let mut session = match russh::server::run_stream(config, stream, handler).await {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::warn!(peer = %peer, error = %e, "SSH handshake failed");
                        return;
                    }
                };

                tokio::select! {
                    result = &mut session => {
                        if let Err(e) = result {
                            tracing::debug!(peer = %peer, error = %e, "SSH connection closed");
                        }
                    }
                    _ = shutdown.recv() => {
                        let _ = session
                            .handle()
                            .disconnect(russh::Disconnect::ByApplication, "shutting down".into(), "en".into())
                            .await;
                    }
                }
            });
        }

        tracing::info!("SSH listener stopped");
        Ok(())
    }
}
