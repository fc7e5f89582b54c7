//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): proxied HTTP requests by method, status, host
//! - `gateway_request_duration_seconds` (histogram): proxied request latency
//! - `gateway_denied_total` (counter): deny-list hits by protocol
//! - `gateway_upstream_errors_total` (counter): backend failures by protocol
//! - `gateway_active_tunnels` (gauge): open WebSocket / SSH tunnels
//! - `gateway_access_log_dropped_total` (counter): records lost to a full queue
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Host label uses the virtual host, never the backend address

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, host: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("host", host.to_string()),
    ];
    counter!("gateway_requests_total", &labels[..]).increment(1);
    histogram!("gateway_request_duration_seconds", &labels[..]).record(start.elapsed().as_secs_f64());
}

pub fn record_denied(protocol: &'static str) {
    counter!("gateway_denied_total", "protocol" => protocol).increment(1);
}

pub fn record_upstream_error(protocol: &'static str) {
    counter!("gateway_upstream_errors_total", "protocol" => protocol).increment(1);
}

pub fn tunnel_opened(kind: &'static str) {
    gauge!("gateway_active_tunnels", "kind" => kind).increment(1.0);
}

pub fn tunnel_closed(kind: &'static str) {
    gauge!("gateway_active_tunnels", "kind" => kind).decrement(1.0);
}

pub fn record_access_log_dropped() {
    counter!("gateway_access_log_dropped_total").increment(1);
}
