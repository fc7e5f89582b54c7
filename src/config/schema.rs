//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener addresses and process-wide limits.
    pub server: ServerConfig,

    /// How the HTTPS router terminates TLS.
    pub tls: TlsConfig,

    /// Automatic certificate issuance settings.
    pub acme: AcmeConfig,

    /// Event and access log settings.
    pub logging: LoggingConfig,

    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,

    /// Path to the JSON deny list (array of IP literals).
    pub deny_list: Option<PathBuf>,

    /// Domain, path and SSH routing rules.
    pub routes: RoutesConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Plain HTTP listener (HTTPS redirect + ACME challenges).
    pub http_address: String,

    /// Virtual-host router listener.
    pub https_address: String,

    /// Interface used by per-path WebSocket listeners and the SSH listener.
    pub listen_host: String,

    /// Maximum concurrent SSH connections (backpressure).
    pub max_connections: usize,

    /// Time allowed for in-flight work after a shutdown signal.
    pub shutdown_grace_secs: u64,

    /// Whole-request deadline for proxied HTTP requests. Unset means none.
    pub request_timeout_secs: Option<u64>,

    /// Deadline for dialing a backend. Unset means none.
    pub backend_connect_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_address: "0.0.0.0:80".to_string(),
            https_address: "0.0.0.0:443".to_string(),
            listen_host: "0.0.0.0".to_string(),
            max_connections: 10_000,
            shutdown_grace_secs: 2,
            request_timeout_secs: None,
            backend_connect_timeout_secs: None,
        }
    }
}

/// TLS termination mode for the HTTPS router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Certificates issued on demand through ACME.
    #[default]
    Acme,
    /// Certificate and key loaded from PEM files.
    Static,
    /// Plain HTTP on the HTTPS address.
    Disabled,
}

/// TLS configuration for the listeners.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    pub mode: TlsMode,

    /// Path to certificate file (PEM), `static` mode only.
    pub cert_path: Option<PathBuf>,

    /// Path to private key file (PEM), `static` mode only.
    pub key_path: Option<PathBuf>,
}

/// ACME account and cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcmeConfig {
    /// Directory-backed certificate and account cache.
    pub cache_dir: PathBuf,

    /// Account contacts, `mailto:` is added when missing.
    pub contacts: Vec<String>,

    /// Use the Let's Encrypt production directory instead of staging.
    pub production: bool,

    /// Custom ACME directory URL, overrides `production`.
    pub directory_url: Option<String>,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("certs"),
            contacts: Vec::new(),
            production: false,
            directory_url: None,
        }
    }
}

/// Event log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// What the access log does when its queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Discard the record being submitted.
    #[default]
    DropNewest,
    /// Wait for room in the queue.
    Block,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub level: String,

    pub format: LogFormat,

    /// Append event records to this file in addition to stdout.
    pub event_log: Option<PathBuf>,

    /// Append access records to this file. Unset emits them as tracing events.
    pub access_log: Option<PathBuf>,

    /// Capacity of the access log queue.
    pub queue_capacity: usize,

    pub overflow: OverflowPolicy,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            event_log: None,
            access_log: None,
            queue_capacity: 1024,
            overflow: OverflowPolicy::DropNewest,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics endpoint.
    pub enabled: bool,

    /// Metrics endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Routing rules: domains with their subdomains and paths, plus SSH.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct RoutesConfig {
    pub domains: Vec<DomainConfig>,

    pub ssh: Option<SshRoutesConfig>,

    /// Backend hostnames dialed at pinned addresses instead of through DNS.
    pub resolve: BTreeMap<String, Vec<String>>,
}

/// A domain and everything served beneath it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DomainConfig {
    pub name: String,

    /// Paths served at the bare domain.
    #[serde(default)]
    pub paths: Vec<PathConfig>,

    /// CORS policy for the bare domain paths.
    #[serde(default)]
    pub cors: Option<CorsConfig>,

    #[serde(default)]
    pub subdomains: Vec<SubdomainConfig>,
}

/// A subdomain. A name equal to the parent domain means the domain itself.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SubdomainConfig {
    pub name: String,

    #[serde(default)]
    pub paths: Vec<PathConfig>,

    #[serde(default)]
    pub cors: Option<CorsConfig>,
}

/// A path prefix forwarded to a backend.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct PathConfig {
    /// URL path prefix, e.g. `/api`.
    pub location: String,

    /// Backend URL (scheme, host, port, optional base path).
    pub target: String,

    /// WebSocket tunnel instead of HTTP proxying.
    #[serde(default)]
    pub upgrade: bool,

    /// Dedicated listener port, required for upgrade paths.
    #[serde(default, alias = "listenPort")]
    pub listen_port: Option<u16>,

    /// Serve the dedicated listener over TLS.
    #[serde(default)]
    pub tls: bool,
}

/// Cross-origin policy applied to every response of a host.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct CorsConfig {
    #[serde(alias = "allowOrigins")]
    pub allow_origins: Vec<String>,
    #[serde(alias = "allowMethods")]
    pub allow_methods: Vec<String>,
    #[serde(alias = "allowHeaders")]
    pub allow_headers: Vec<String>,
    #[serde(alias = "exposeHeaders")]
    pub expose_headers: Vec<String>,
    #[serde(alias = "allowCredentials")]
    pub allow_credentials: bool,
    /// Preflight cache lifetime in seconds, 0 omits the header.
    #[serde(alias = "maxAge")]
    pub max_age: u32,
}

/// How an SSH channel picks among several backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SshStrategy {
    /// Use the first backend accepting the TCP connection.
    #[default]
    FirstReachable,
    /// Connect every reachable backend and mirror the channel to all of them.
    FanOut,
}

/// SSH listener and its forwarding targets.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SshRoutesConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(alias = "listenPort")]
    pub listen_port: u16,

    #[serde(default)]
    pub configs: Vec<SshTargetConfig>,

    #[serde(default)]
    pub strategy: SshStrategy,

    /// Server host key. Generated (Ed25519) when missing.
    #[serde(default = "default_host_key_path")]
    pub host_key_path: PathBuf,
}

fn default_host_key_path() -> PathBuf {
    PathBuf::from("ssh_host_ed25519_key")
}

/// A TCP backend for SSH channels.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SshTargetConfig {
    pub host: String,
    pub port: u16,
}
