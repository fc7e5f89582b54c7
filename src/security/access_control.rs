//! Access gate: IP deny list checked before anything else.
//!
//! # Responsibilities
//! - Hold the deny list loaded at startup
//! - Resolve the client IP of a request (forwarding headers, then socket peer)
//! - Drop denied requests before routing, record allowed ones in the access log

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::observability::access_log::{AccessLog, AccessRecord};
use crate::observability::metrics;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Set of refused client IPs. Membership is an exact string match, no CIDR.
#[derive(Debug, Clone, Default)]
pub struct DenyList {
    entries: HashSet<String>,
}

impl DenyList {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_denied(&self, ip: &str) -> bool {
        self.entries.contains(ip)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolve the client IP of a request.
///
/// Precedence: first `X-Forwarded-For` entry, then `X-Real-Ip`, then the
/// socket peer without its port.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get(X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer_ip(peer)
}

/// Peer IP with the port stripped; IPv4-mapped IPv6 peers are shown as IPv4.
pub fn peer_ip(peer: SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

/// Shared state of the access gate middleware.
#[derive(Clone)]
pub struct AccessGate {
    deny_list: Arc<DenyList>,
    access_log: AccessLog,
}

impl AccessGate {
    pub fn new(deny_list: Arc<DenyList>, access_log: AccessLog) -> Self {
        Self {
            deny_list,
            access_log,
        }
    }

    pub fn deny_list(&self) -> &Arc<DenyList> {
        &self.deny_list
    }
}

/// Middleware: refuse denied clients, log the rest, continue.
pub async fn access_gate_middleware(
    State(gate): State<Arc<AccessGate>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), peer);

    if gate.deny_list.is_denied(&ip) {
        tracing::debug!(client = %ip, path = %request.uri().path(), "Denied client dropped");
        metrics::record_denied("http");
        return denied_response();
    }

    gate.access_log.record(AccessRecord::from_request(&ip, &request)).await;
    next.run(request).await
}

fn denied_response() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
        .headers_mut()
        .insert(header::CONNECTION, header::HeaderValue::from_static("close"));
    response
}
