//! WebSocket tunnel listeners.
//!
//! # Responsibilities
//! - Serve one upgrade route on its dedicated port
//! - Complete the upgrade handshake with the client (any origin)
//! - Dial the backend as a WebSocket client with the inbound headers
//! - Forward frames in both directions until either side ends
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Gateway ←──── WebSocket frames ────→ Backend
//! ```
//!
//! # Design Decisions
//! - Upgrade first, then dial: a dead backend closes the client socket
//! - Text stays text, binary stays binary
//! - Ping/pong answered per leg, never forwarded
//! - Both sinks are closed once, after the first direction ends

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::{header, HeaderMap, Uri},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest, Message as BackendMessage};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::http::response;
use crate::http::server::serve;
use crate::net::{ServerTls, TunnelTracker};
use crate::observability::metrics;
use crate::routing::{RouteEntry, RouteTarget};
use crate::security::access_control::{access_gate_middleware, peer_ip};
use crate::security::headers::{set_forwarded, strip_hop_by_hop};
use crate::security::AccessGate;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("client: {0}")]
    Client(#[from] axum::Error),
    #[error("backend: {0}")]
    Backend(#[from] tungstenite::Error),
}

#[derive(Clone)]
struct TunnelState {
    entry: Arc<RouteEntry>,
    backend: Url,
    proto: &'static str,
    tracker: TunnelTracker,
}

/// Listener of one upgrade route.
pub struct WebSocketListener {
    entry: RouteEntry,
    backend: Url,
    listen_port: u16,
    tls: bool,
}

impl WebSocketListener {
    /// Returns `None` for entries that are not upgrade routes.
    pub fn new(entry: RouteEntry) -> Option<Self> {
        let RouteTarget::WebSocket(route) = &entry.target else {
            return None;
        };
        let (backend, listen_port, tls) = (route.url().clone(), route.listen_port, route.tls);
        Some(Self {
            entry,
            backend,
            listen_port,
            tls,
        })
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    pub fn wants_tls(&self) -> bool {
        self.tls
    }

    pub fn router(&self, gate: Arc<AccessGate>, tracker: TunnelTracker, proto: &'static str) -> Router {
        let state = TunnelState {
            entry: Arc::new(self.entry.clone()),
            backend: self.backend.clone(),
            proto,
            tracker,
        };

        Router::new()
            .route("/", any(upgrade_handler))
            .route("/{*path}", any(upgrade_handler))
            .with_state(state)
            .layer(middleware::from_fn_with_state(gate, access_gate_middleware))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn run(
        self,
        listener: TcpListener,
        gate: Arc<AccessGate>,
        tracker: TunnelTracker,
        tls: Option<ServerTls>,
        shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let proto = if tls.is_some() { "https" } else { "http" };
        tracing::info!(
            address = %listener.local_addr()?,
            host = %self.entry.host,
            location = %self.entry.prefix.as_str(),
            backend = %self.backend,
            tls = tls.is_some(),
            "WebSocket listener starting"
        );
        let app = self.router(gate, tracker, proto);
        serve(listener, app, tls, shutdown).await
    }
}

async fn upgrade_handler(
    State(state): State<TunnelState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.entry.prefix.matches(uri.path()) {
        return response::not_found();
    }

    ws.on_upgrade(move |socket| async move {
        let _guard = state.tracker.track("websocket");
        let request = match backend_request(&state.backend, &headers, peer, state.proto) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(backend = %state.backend, error = %e, "Invalid backend request");
                return;
            }
        };

        let backend = match tokio_tungstenite::connect_async(request).await {
            Ok((backend, _)) => backend,
            Err(e) => {
                metrics::record_upstream_error("websocket");
                tracing::error!(backend = %state.backend, error = %e, "Error connecting to target server");
                let mut socket = socket;
                let _ = SinkExt::close(&mut socket).await;
                return;
            }
        };

        tracing::debug!(peer = %peer, backend = %state.backend, "WebSocket tunnel established");
        if let Err(e) = tunnel(socket, backend).await {
            tracing::debug!(peer = %peer, error = %e, "WebSocket tunnel ended with error");
        }
    })
}

/// Backend handshake request carrying the client's end-to-end headers.
fn backend_request(
    backend: &Url,
    inbound: &HeaderMap,
    peer: SocketAddr,
    proto: &str,
) -> Result<tungstenite::handshake::client::Request, tungstenite::Error> {
    let mut request = backend.as_str().into_client_request()?;

    let mut forwarded = inbound.clone();
    strip_hop_by_hop(&mut forwarded);
    let inbound_host = inbound.get(header::HOST).and_then(|v| v.to_str().ok());
    set_forwarded(&mut forwarded, inbound_host, &peer_ip(peer), proto);

    let headers = request.headers_mut();
    for (name, value) in forwarded.iter() {
        if name == header::HOST || name.as_str().starts_with("sec-websocket-") {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    Ok(request)
}

/// Relay frames until one direction ends, then close both sinks.
pub async fn tunnel<B>(client: WebSocket, backend: B) -> Result<(), TunnelError>
where
    B: Stream<Item = Result<BackendMessage, tungstenite::Error>>
        + Sink<BackendMessage, Error = tungstenite::Error>
        + Unpin,
{
    let (mut client_tx, mut client_rx) = client.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    let result = tokio::select! {
        res = client_to_backend(&mut client_rx, &mut backend_tx) => res,
        res = backend_to_client(&mut backend_rx, &mut client_tx) => res,
    };

    let _ = client_tx.close().await;
    let _ = backend_tx.close().await;
    result
}

async fn client_to_backend<R, W>(client: &mut R, backend: &mut W) -> Result<(), TunnelError>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    W: Sink<BackendMessage, Error = tungstenite::Error> + Unpin,
{
    while let Some(message) = client.next().await {
        let forwarded = match message? {
            Message::Text(text) => BackendMessage::text(text.as_str().to_owned()),
            Message::Binary(data) => BackendMessage::binary(data),
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        backend.send(forwarded).await?;
    }
    Ok(())
}

async fn backend_to_client<R, W>(backend: &mut R, client: &mut W) -> Result<(), TunnelError>
where
    R: Stream<Item = Result<BackendMessage, tungstenite::Error>> + Unpin,
    W: Sink<Message, Error = axum::Error> + Unpin,
{
    while let Some(message) = backend.next().await {
        let forwarded = match message? {
            BackendMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
            BackendMessage::Binary(data) => Message::Binary(data),
            BackendMessage::Close(_) => return Ok(()),
            BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => continue,
        };
        client.send(forwarded).await?;
    }
    Ok(())
}
