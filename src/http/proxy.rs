//! Reverse proxy to HTTP backends.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the route target
//! - Rewrite Host and the X-Forwarded headers
//! - Strip hop-by-hop headers in both directions
//! - Enforce the route's CORS policy on every response, errors included
//! - Map backend failures to 502 without touching the listener
//!
//! # Design Decisions
//! - Bodies stream through; nothing is buffered
//! - Pinned hostnames bypass DNS; everything else uses the system resolver
//! - No timeouts unless configured

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, Uri, Version};
use axum::response::Response;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::dns::{GaiResolver, Name};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tower::Service;
use url::Url;

use crate::http::request::RequestIdExt;
use crate::http::response;
use crate::observability::metrics;
use crate::routing::{ProxyTarget, ResolveTable, RouteEntry};
use crate::security::access_control::peer_ip;
use crate::security::headers::{set_forwarded, strip_hop_by_hop};

/// DNS resolver consulting the pinned table before the system resolver.
#[derive(Clone)]
pub struct PinnedResolver {
    table: Arc<ResolveTable>,
    system: GaiResolver,
}

impl PinnedResolver {
    pub fn new(table: Arc<ResolveTable>) -> Self {
        Self {
            table,
            system: GaiResolver::new(),
        }
    }
}

impl Service<Name> for PinnedResolver {
    type Response = std::vec::IntoIter<SocketAddr>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        if let Some(addrs) = self.table.lookup(name.as_str()) {
            // Port 0 is replaced with the URI port by the connector.
            let addrs: Vec<SocketAddr> = addrs.iter().map(|ip| SocketAddr::new(*ip, 0)).collect();
            return Box::pin(async move { Ok(addrs.into_iter()) });
        }

        let mut system = self.system.clone();
        Box::pin(async move {
            let addrs = system.call(name).await?;
            Ok(addrs.collect::<Vec<_>>().into_iter())
        })
    }
}

type BackendClient = Client<HttpsConnector<HttpConnector<PinnedResolver>>, Body>;

#[derive(Clone)]
pub struct ReverseProxy {
    client: BackendClient,
    proto: &'static str,
}

impl ReverseProxy {
    /// `proto` is the scheme of the listener in front of this proxy.
    pub fn new(resolve: Arc<ResolveTable>, connect_timeout: Option<Duration>, proto: &'static str) -> Self {
        let mut http = HttpConnector::new_with_resolver(PinnedResolver::new(resolve));
        http.enforce_http(false);
        http.set_connect_timeout(connect_timeout);

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        Self {
            client: Client::builder(TokioExecutor::new()).build(https),
            proto,
        }
    }

    pub async fn forward(
        &self,
        entry: &RouteEntry,
        target: &ProxyTarget,
        request: Request<Body>,
        peer: SocketAddr,
    ) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let request_id = request.request_id().to_string();
        let origin = header_string(&request, header::ORIGIN);
        // HTTP/2 clients carry the host in the :authority pseudo-header.
        let inbound_host = header_string(&request, header::HOST)
            .or_else(|| request.uri().authority().map(|a| a.to_string()));
        let inbound_version = request.version();

        let (mut parts, body) = request.into_parts();
        let uri = match rewrite_uri(target.url(), &parts.uri) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(request_id = %request_id, target = %target.url(), error = %e, "Cannot build backend URI");
                return self.failed(entry, &method, origin.as_deref(), start);
            }
        };

        strip_hop_by_hop(&mut parts.headers);
        if let Ok(host) = HeaderValue::from_str(target.host()) {
            parts.headers.insert(header::HOST, host);
        }
        set_forwarded(&mut parts.headers, inbound_host.as_deref(), &peer_ip(peer), self.proto);
        parts.uri = uri;
        // The backend leg is HTTP/1.1 whatever the client negotiated.
        parts.version = Version::HTTP_11;

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            host = %entry.host,
            backend = %parts.uri,
            "Proxying request"
        );

        match self.client.request(Request::from_parts(parts, body)).await {
            Ok(backend_response) => {
                let (mut parts, body) = backend_response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                parts.version = inbound_version;
                if let Some(cors) = &entry.cors {
                    cors.apply(&mut parts.headers, origin.as_deref());
                }
                metrics::record_request(method.as_str(), parts.status.as_u16(), &entry.host, start);
                Response::from_parts(parts, Body::new(body))
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    host = %entry.host,
                    target = %target.url(),
                    error = %e,
                    "Upstream error"
                );
                self.failed(entry, &method, origin.as_deref(), start)
            }
        }
    }

    fn failed(&self, entry: &RouteEntry, method: &Method, origin: Option<&str>, start: Instant) -> Response {
        metrics::record_upstream_error("http");
        metrics::record_request(method.as_str(), 502, &entry.host, start);
        let mut response = response::bad_gateway();
        if let Some(cors) = &entry.cors {
            cors.apply(response.headers_mut(), origin);
        }
        response
    }
}

fn header_string<B>(request: &Request<B>, name: header::HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Target scheme and authority, target path joined with the inbound path,
/// target query followed by the inbound query.
pub fn rewrite_uri(target: &Url, inbound: &Uri) -> Result<Uri, axum::http::Error> {
    let path = join_paths(target.path(), inbound.path());
    let query = match (
        target.query().filter(|q| !q.is_empty()),
        inbound.query().filter(|q| !q.is_empty()),
    ) {
        (Some(a), Some(b)) => Some(format!("{a}&{b}")),
        (Some(q), None) | (None, Some(q)) => Some(q.to_string()),
        (None, None) => None,
    };
    let path_and_query = match query {
        Some(q) => format!("{path}?{q}"),
        None => path,
    };

    let host = target.host_str().unwrap_or_default();
    let authority = match target.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    Uri::builder()
        .scheme(target.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}
