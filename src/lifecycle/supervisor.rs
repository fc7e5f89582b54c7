//! Listener supervision.
//!
//! # Responsibilities
//! - Prepare TLS for the configured mode (ACME, static PEM, disabled)
//! - Bind every listener, required ones before anything is spawned
//! - Run listeners as independent tasks
//! - Report the first failure of a required task
//! - Drain tasks and tunnels within the shutdown grace period
//!
//! # Design Decisions
//! - Required: the HTTPS server and the SSH listener. Their bind or run
//!   failure stops the gateway
//! - Auxiliary: the redirect server, WebSocket listeners, the ACME driver.
//!   Their failures are logged and stay local

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::certs::{AcmeDriver, CertError, CertificateManager};
use crate::config::{GatewayConfig, TlsMode};
use crate::http::{redirect_router, serve, HttpsServer, ReverseProxy, WebSocketListener};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::tls::load_tls_config;
use crate::net::{bind_tcp, TunnelTracker, Listener, ListenerError, ServerTls};
use crate::routing::RouteTable;
use crate::security::AccessGate;
use crate::ssh::{SshError, SshServer};

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Cert(#[from] CertError),
    #[error(transparent)]
    Ssh(#[from] SshError),
    #[error("{task} failed: {source}")]
    Serve {
        task: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

type TaskResult = (&'static str, Result<(), SupervisorError>);

/// Addresses the listeners actually bound.
#[derive(Debug, Clone, Default)]
pub struct BoundAddresses {
    pub https: Option<SocketAddr>,
    pub http: Option<SocketAddr>,
    pub ssh: Option<SocketAddr>,
    pub websockets: Vec<SocketAddr>,
}

struct Tls {
    server: Option<ServerTls>,
    challenge: Option<axum::Router>,
    driver: Option<AcmeDriver>,
}

pub struct Supervisor {
    required: JoinSet<TaskResult>,
    auxiliary: JoinSet<()>,
    tracker: TunnelTracker,
    addresses: BoundAddresses,
}

impl Supervisor {
    /// Bind and spawn every listener the configuration and route table call for.
    pub async fn start(
        config: &GatewayConfig,
        routes: Arc<RouteTable>,
        gate: Arc<AccessGate>,
        shutdown: &Shutdown,
    ) -> Result<Self, SupervisorError> {
        let tls = prepare_tls(config, &routes).await?;
        let tracker = TunnelTracker::new();
        let mut addresses = BoundAddresses::default();
        let connect_timeout = config.server.backend_connect_timeout_secs.map(Duration::from_secs);

        // Required listeners first: a bind failure here is fatal.
        let https = if routes.has_hosts() {
            Some(bind_tcp(&config.server.https_address).await?)
        } else {
            tracing::warn!("No virtual hosts configured, HTTPS server not started");
            None
        };
        let ssh = match routes.ssh() {
            Some(ssh) => {
                let address = format!("{}:{}", config.server.listen_host, ssh.listen_port);
                let listener = Listener::bind(&address, config.server.max_connections).await?;
                let server = SshServer::new(ssh, Arc::clone(gate.deny_list()), tracker.clone(), connect_timeout).await?;
                Some((listener, server))
            }
            None => None,
        };

        let mut required = JoinSet::new();
        let mut auxiliary = JoinSet::new();

        if let Some(listener) = https {
            addresses.https = listener.local_addr().ok();
            let proto = if tls.server.is_some() { "https" } else { "http" };
            let proxy = ReverseProxy::new(routes.resolve_table(), connect_timeout, proto);
            let server = HttpsServer::new(
                Arc::clone(&routes),
                proxy,
                Arc::clone(&gate),
                config.server.request_timeout_secs.map(Duration::from_secs),
            );
            let rx = shutdown.subscribe();
            let server_tls = tls.server.clone();
            required.spawn(async move {
                let result = server.run(listener, server_tls, rx).await;
                ("https", result.map_err(|source| SupervisorError::Serve { task: "https", source }))
            });
        }

        if let Some((listener, server)) = ssh {
            addresses.ssh = listener.local_addr().ok();
            let rx = shutdown.subscribe();
            required.spawn(async move { ("ssh", server.run(listener, rx).await.map_err(Into::into)) });
        }

        // The redirect only makes sense when HTTPS exists on the other port.
        if tls.server.is_some() {
            match bind_tcp(&config.server.http_address).await {
                Ok(listener) => {
                    addresses.http = listener.local_addr().ok();
                    let app = redirect_router(tls.challenge.clone(), Arc::clone(&gate));
                    let rx = shutdown.subscribe();
                    auxiliary.spawn(async move {
                        if let Err(e) = serve(listener, app, None, rx).await {
                            tracing::error!(error = %e, "Redirect server failed");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "Redirect server not started"),
            }
        }

        for entry in routes.websockets() {
            let Some(ws) = WebSocketListener::new(entry.clone()) else {
                continue;
            };
            let address = format!("{}:{}", config.server.listen_host, ws.listen_port());
            let listener = match bind_tcp(&address).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(host = %entry.host, location = %entry.prefix.as_str(), error = %e, "WebSocket listener not started");
                    continue;
                }
            };
            if let Ok(addr) = listener.local_addr() {
                addresses.websockets.push(addr);
            }

            let ws_tls = match (ws.wants_tls(), &tls.server) {
                (true, Some(server)) => Some(server.clone()),
                (true, None) => {
                    tracing::warn!(address = %address, "TLS disabled, WebSocket listener serves plain HTTP");
                    None
                }
                (false, _) => None,
            };
            let gate = Arc::clone(&gate);
            let tracker = tracker.clone();
            let rx = shutdown.subscribe();
            auxiliary.spawn(async move {
                if let Err(e) = ws.run(listener, gate, tracker, ws_tls, rx).await {
                    tracing::error!(address = %address, error = %e, "WebSocket listener failed");
                }
            });
        }

        if let Some(driver) = tls.driver {
            let rx = shutdown.subscribe();
            auxiliary.spawn(driver.run(rx));
        }

        tracing::info!(
            required = required.len(),
            auxiliary = auxiliary.len(),
            "Listeners started"
        );

        Ok(Self {
            required,
            auxiliary,
            tracker,
            addresses,
        })
    }

    pub fn addresses(&self) -> &BoundAddresses {
        &self.addresses
    }

    /// Resolve when every task has ended, or with the first required failure.
    pub async fn wait(&mut self) -> Result<(), SupervisorError> {
        while let Some(joined) = self.required.join_next().await {
            let (task, result) = joined?;
            match result {
                Ok(()) => tracing::info!(task, "Task finished"),
                Err(e) => {
                    tracing::error!(task, error = %e, "Required task failed");
                    return Err(e);
                }
            }
        }
        while self.auxiliary.join_next().await.is_some() {}
        Ok(())
    }

    /// Wait for tasks and open tunnels to end, aborting what outlives `grace`.
    pub async fn drain(mut self, grace: Duration) {
        let drained = tokio::time::timeout(grace, async {
            while self.required.join_next().await.is_some() {}
            while self.auxiliary.join_next().await.is_some() {}
            self.tracker.wait_idle().await;
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                open_tunnels = self.tracker.open_count(),
                "Grace period elapsed, aborting remaining tasks"
            );
            self.required.abort_all();
            self.auxiliary.abort_all();
        }
    }
}

async fn prepare_tls(config: &GatewayConfig, routes: &RouteTable) -> Result<Tls, SupervisorError> {
    match config.tls.mode {
        TlsMode::Disabled => Ok(Tls {
            server: None,
            challenge: None,
            driver: None,
        }),
        TlsMode::Static => {
            let (Some(cert), Some(key)) = (&config.tls.cert_path, &config.tls.key_path) else {
                return Err(CertError::Static(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "cert_path and key_path are required",
                ))
                .into());
            };
            let rustls = load_tls_config(cert, key).await.map_err(CertError::Static)?;
            Ok(Tls {
                server: Some(ServerTls::Static(rustls)),
                challenge: None,
                driver: None,
            })
        }
        TlsMode::Acme if routes.hostnames().is_empty() => {
            tracing::warn!("No hostnames configured, certificate manager not started");
            Ok(Tls {
                server: None,
                challenge: None,
                driver: None,
            })
        }
        TlsMode::Acme => {
            let manager = CertificateManager::new(routes.hostnames(), &config.acme)?;
            Ok(Tls {
                server: Some(manager.tls()),
                challenge: Some(manager.challenge_router()),
                driver: Some(manager.into_driver()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomainConfig, OverflowPolicy, PathConfig};
    use crate::net::tls::install_crypto_provider;
    use crate::observability::AccessLog;
    use crate::security::DenyList;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.server.https_address = "127.0.0.1:0".into();
        config.server.http_address = "127.0.0.1:0".into();
        config.tls.mode = TlsMode::Disabled;
        config.routes.domains.push(DomainConfig {
            name: "example.com".into(),
            paths: vec![PathConfig {
                location: "/".into(),
                target: "http://127.0.0.1:9".into(),
                ..Default::default()
            }],
            cors: None,
            subdomains: Vec::new(),
        });
        config
    }

    fn gate() -> Arc<AccessGate> {
        let (log, _) = AccessLog::channel(8, OverflowPolicy::DropNewest);
        Arc::new(AccessGate::new(Arc::new(DenyList::default()), log))
    }

    #[tokio::test]
    async fn required_bind_failure_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.server.https_address = taken.local_addr().unwrap().to_string();
        let routes = Arc::new(RouteTable::compile(&config.routes));

        let result = Supervisor::start(&config, routes, gate(), &Shutdown::new()).await;
        assert!(matches!(result, Err(SupervisorError::Listener(_))));
    }

    #[tokio::test]
    async fn plain_mode_skips_the_redirect_server() {
        install_crypto_provider();
        let config = config();
        let routes = Arc::new(RouteTable::compile(&config.routes));
        let shutdown = Shutdown::new();

        let supervisor = Supervisor::start(&config, routes, gate(), &shutdown).await.unwrap();
        assert!(supervisor.addresses().https.is_some());
        assert!(supervisor.addresses().http.is_none());
        assert!(supervisor.addresses().ssh.is_none());

        shutdown.trigger();
        supervisor.drain(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn static_mode_without_files_is_an_error() {
        let mut config = config();
        config.tls.mode = TlsMode::Static;
        let routes = Arc::new(RouteTable::compile(&config.routes));

        let result = Supervisor::start(&config, routes, gate(), &Shutdown::new()).await;
        assert!(matches!(result, Err(SupervisorError::Cert(CertError::Static(_)))));
    }
}
