//! HTTPS virtual-host server.
//!
//! # Responsibilities
//! - Create the Axum Router with the dispatch handler
//! - Wire up middleware (tracing, request ID, access gate, optional timeout)
//! - Dispatch each request by host and longest path prefix
//! - Answer CORS preflights without contacting the backend
//! - Serve a router on a bound listener, with or without TLS

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Method, Request},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::proxy::ReverseProxy;
use crate::http::request::with_request_id;
use crate::http::response;
use crate::net::ServerTls;
use crate::routing::matcher::request_host;
use crate::routing::{RouteTable, RouteTarget};
use crate::security::access_control::access_gate_middleware;
use crate::security::AccessGate;

/// State shared by every dispatch.
#[derive(Clone)]
pub struct DispatchState {
    pub routes: Arc<RouteTable>,
    pub proxy: ReverseProxy,
}

/// The virtual-host router serving every configured host.
pub struct HttpsServer {
    router: Router,
}

impl HttpsServer {
    pub fn new(
        routes: Arc<RouteTable>,
        proxy: ReverseProxy,
        gate: Arc<AccessGate>,
        request_timeout: Option<Duration>,
    ) -> Self {
        let state = DispatchState { routes, proxy };
        Self {
            router: Self::build_router(state, gate, request_timeout),
        }
    }

    #[allow(deprecated)]
    fn build_router(state: DispatchState, gate: Arc<AccessGate>, request_timeout: Option<Duration>) -> Router {
        let router = Router::new()
            .route("/", any(dispatch_handler))
            .route("/{*path}", any(dispatch_handler))
            .with_state(state);

        let router = match request_timeout {
            Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
            None => router,
        };

        with_request_id(router.layer(middleware::from_fn_with_state(gate, access_gate_middleware)))
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub async fn run(
        self,
        listener: TcpListener,
        tls: Option<ServerTls>,
        shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = tls.is_some(), "HTTPS server starting");
        serve(listener, self.router, tls, shutdown).await?;
        tracing::info!(address = %addr, "HTTPS server stopped");
        Ok(())
    }
}

/// Look up the route and forward the request.
async fn dispatch_handler(
    State(state): State<DispatchState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let Some(host) = request_host(&request) else {
        return response::not_found();
    };

    let Some(entry) = state.routes.resolve(&host, request.uri().path()) else {
        tracing::debug!(host = %host, path = %request.uri().path(), "No route matched");
        return response::not_found();
    };

    let RouteTarget::Proxy(target) = &entry.target else {
        return response::not_found();
    };

    if let Some(cors) = &entry.cors {
        if request.method() == Method::OPTIONS {
            let origin = request.headers().get(header::ORIGIN).and_then(|v| v.to_str().ok());
            let mut preflight = response::no_content();
            cors.apply(preflight.headers_mut(), origin);
            return preflight;
        }
    }

    state.proxy.forward(entry, target, request, peer).await
}

/// Serve `app` on `listener` until `shutdown` fires.
///
/// Without TLS the router is served by `axum::serve`; with TLS the listener
/// is handed to axum-server with the given acceptor.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    tls: Option<ServerTls>,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let Some(tls) = tls else {
        return axum::serve(listener, make_service)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
    };

    let handle = axum_server::Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            let _ = shutdown.recv().await;
            handle.graceful_shutdown(None);
        }
    });

    let listener = listener.into_std()?;
    match tls {
        ServerTls::Static(config) => {
            axum_server::from_tcp_rustls(listener, config)
                .handle(handle)
                .serve(make_service)
                .await
        }
        ServerTls::Acme(acceptor) => {
            axum_server::from_tcp(listener)
                .acceptor(acceptor)
                .handle(handle)
                .serve(make_service)
                .await
        }
    }
}
