//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use edge_gateway::config::{
    DomainConfig, GatewayConfig, LoggingConfig, PathConfig, SubdomainConfig, TlsMode,
};
use edge_gateway::lifecycle::{BoundAddresses, Shutdown, Supervisor};
use edge_gateway::net::tls::install_crypto_provider;
use edge_gateway::observability::AccessLog;
use edge_gateway::routing::RouteTable;
use edge_gateway::security::{AccessGate, DenyList};

/// Origin the mock backend claims in its own CORS header.
pub const BACKEND_ORIGIN: &str = "https://backend.invalid";

/// Start an HTTP backend answering every request with a JSON description of it.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().fallback(echo);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(request: Request<Body>) -> Response {
    let headers: BTreeMap<String, String> = request
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();

    let mut response = Json(json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "query": request.uri().query(),
        "headers": headers,
    }))
    .into_response();
    response
        .headers_mut()
        .insert("access-control-allow-origin", HeaderValue::from_static(BACKEND_ORIGIN));
    response
}

/// Start a WebSocket backend echoing text and binary frames.
pub async fn start_ws_echo_backend() -> SocketAddr {
    start_ws_echo_backend_with_close_signal().await.0
}

/// Like [`start_ws_echo_backend`], also reporting each backend connection
/// that has ended.
pub async fn start_ws_echo_backend_with_close_signal() -> (SocketAddr, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let closed_tx = closed_tx.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_text() || message.is_binary() {
                        if ws.send(message).await.is_err() {
                            break;
                        }
                    } else if message.is_close() {
                        break;
                    }
                }
                let _ = closed_tx.send(());
            });
        }
    });
    (addr, closed_rx)
}

/// Start a TCP backend that writes `banner` on connect, then echoes.
pub async fn start_tcp_echo_backend(banner: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if socket.write_all(banner.as_bytes()).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// A port that was free a moment ago.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Plain-HTTP gateway configuration on ephemeral loopback ports.
pub fn base_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.https_address = "127.0.0.1:0".into();
    config.server.http_address = "127.0.0.1:0".into();
    config.server.listen_host = "127.0.0.1".into();
    config.server.shutdown_grace_secs = 1;
    config.server.backend_connect_timeout_secs = Some(2);
    config.tls.mode = TlsMode::Disabled;
    config
}

pub fn path(location: &str, target: &str) -> PathConfig {
    PathConfig {
        location: location.into(),
        target: target.into(),
        ..Default::default()
    }
}

pub fn domain(name: &str, paths: Vec<PathConfig>) -> DomainConfig {
    DomainConfig {
        name: name.into(),
        paths,
        cors: None,
        subdomains: Vec::new(),
    }
}

pub fn subdomain(name: &str, paths: Vec<PathConfig>) -> SubdomainConfig {
    SubdomainConfig {
        name: name.into(),
        paths,
        cors: None,
    }
}

pub struct TestGateway {
    pub addresses: BoundAddresses,
    shutdown: Shutdown,
    supervisor: Supervisor,
}

impl TestGateway {
    pub fn https(&self) -> SocketAddr {
        self.addresses.https.unwrap()
    }

    pub fn ssh(&self) -> SocketAddr {
        self.addresses.ssh.unwrap()
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.supervisor.drain(Duration::from_secs(2)).await;
    }
}

/// Start every listener `config` calls for, denying the given addresses.
pub async fn start_gateway(config: GatewayConfig, denied: &[&str]) -> TestGateway {
    install_crypto_provider();

    let routes = Arc::new(RouteTable::compile(&config.routes));
    let (access_log, _) = AccessLog::spawn(&LoggingConfig::default());
    let gate = Arc::new(AccessGate::new(
        Arc::new(DenyList::from_entries(denied.iter().copied())),
        access_log,
    ));

    let shutdown = Shutdown::new();
    let supervisor = Supervisor::start(&config, routes, gate, &shutdown).await.unwrap();

    TestGateway {
        addresses: supervisor.addresses().clone(),
        shutdown,
        supervisor,
    }
}

/// Client that never follows redirects and never pools connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}
