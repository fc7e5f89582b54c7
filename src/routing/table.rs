//! Compiled route table.
//!
//! # Responsibilities
//! - Fold domains, self subdomains and bare paths into virtual hosts
//! - Parse every path target once, skipping the malformed ones
//! - Derive the certificate hostname whitelist
//! - Freeze the pinned resolver table
//! - Look up the route for a (host, path) pair
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(1) host lookup via HashMap, O(n) prefix scan per host
//! - Longest prefix wins; declaration order breaks ties
//! - Compilation never fails: a bad path is an error event, not a fatal

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use url::Url;

use crate::config::{CorsConfig, PathConfig, RoutesConfig, SshRoutesConfig};
use crate::routing::matcher::{normalize_host, PathPrefix};
use crate::security::CorsPolicy;

/// Backend of a buffered HTTP route.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyTarget {
    url: Url,
}

impl ProxyTarget {
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Target host without port.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

/// Backend and listener of a WebSocket tunnel route.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketRoute {
    url: Url,
    pub listen_port: u16,
    pub tls: bool,
}

impl WebSocketRoute {
    /// `ws` or `wss` backend URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteTarget {
    Proxy(ProxyTarget),
    WebSocket(WebSocketRoute),
}

/// One `(host, prefix) → target` rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteEntry {
    pub host: String,
    pub prefix: PathPrefix,
    pub target: RouteTarget,
    pub cors: Option<Arc<CorsPolicy>>,
}

/// Hostname → pinned addresses used by the backend connector.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveTable {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl ResolveTable {
    pub fn lookup(&self, host: &str) -> Option<&[IpAddr]> {
        self.entries
            .get(&normalize_host(host))
            .map(Vec::as_slice)
            .filter(|addrs| !addrs.is_empty())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTable {
    hosts: HashMap<String, Vec<RouteEntry>>,
    websockets: Vec<RouteEntry>,
    hostnames: Vec<String>,
    resolve: Arc<ResolveTable>,
    ssh: Option<SshRoutesConfig>,
}

impl RouteTable {
    pub fn compile(config: &RoutesConfig) -> Self {
        let mut table = RouteTable::default();

        for domain in &config.domains {
            let domain_name = normalize_host(&domain.name);
            let mut bare_host = false;

            // Self subdomains are evaluated before the domain's own paths.
            for sub in domain.subdomains.iter().filter(|s| normalize_host(&s.name) == domain_name) {
                bare_host = true;
                let cors = compile_cors(sub.cors.as_ref());
                for path in &sub.paths {
                    table.add_path(&domain_name, path, cors.clone());
                }
            }

            if !domain.paths.is_empty() {
                bare_host = true;
                let cors = compile_cors(domain.cors.as_ref());
                for path in &domain.paths {
                    table.add_path(&domain_name, path, cors.clone());
                }
            }

            if bare_host {
                table.add_hostname(domain_name.clone());
            }

            for sub in domain.subdomains.iter().filter(|s| normalize_host(&s.name) != domain_name) {
                let host = format!("{}.{}", normalize_host(&sub.name), domain_name);
                let cors = compile_cors(sub.cors.as_ref());
                for path in &sub.paths {
                    table.add_path(&host, path, cors.clone());
                }
                table.add_hostname(host);
            }
        }

        table.resolve = Arc::new(compile_resolve(config));
        table.ssh = config.ssh.clone().filter(|ssh| ssh.enabled);

        tracing::debug!(
            hosts = table.hosts.len(),
            websockets = table.websockets.len(),
            hostnames = table.hostnames.len(),
            "Route table compiled"
        );

        table
    }

    /// Proxy route for a request, if any.
    pub fn resolve(&self, host: &str, path: &str) -> Option<&RouteEntry> {
        let entries = self.hosts.get(&normalize_host(host))?;
        let mut best: Option<&RouteEntry> = None;
        for entry in entries.iter().filter(|e| e.prefix.matches(path)) {
            // Strictly longer only, so the first declared of equal prefixes stays.
            if best.map_or(true, |b| entry.prefix.len() > b.prefix.len()) {
                best = Some(entry);
            }
        }
        best
    }

    /// Proxy entries of a host in declaration order.
    pub fn entries_for(&self, host: &str) -> &[RouteEntry] {
        self.hosts
            .get(&normalize_host(host))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Upgrade routes, each owning a dedicated listener.
    pub fn websockets(&self) -> &[RouteEntry] {
        &self.websockets
    }

    /// Certificate whitelist in declaration order, deduplicated.
    pub fn hostnames(&self) -> &[String] {
        &self.hostnames
    }

    pub fn has_hosts(&self) -> bool {
        !self.hosts.is_empty()
    }

    pub fn resolve_table(&self) -> Arc<ResolveTable> {
        self.resolve.clone()
    }

    /// SSH routing, only when enabled.
    pub fn ssh(&self) -> Option<&SshRoutesConfig> {
        self.ssh.as_ref()
    }

    fn add_hostname(&mut self, host: String) {
        if !self.hostnames.contains(&host) {
            self.hostnames.push(host);
        }
    }

    fn add_path(&mut self, host: &str, path: &PathConfig, cors: Option<Arc<CorsPolicy>>) {
        let target = match parse_target(path) {
            Ok(target) => target,
            Err(reason) => {
                tracing::error!(
                    host = %host,
                    location = %path.location,
                    target = %path.target,
                    reason = %reason,
                    "Skipping route"
                );
                return;
            }
        };

        let entry = RouteEntry {
            host: host.to_string(),
            prefix: PathPrefix::new(path.location.clone()),
            target,
            cors,
        };

        match entry.target {
            RouteTarget::Proxy(_) => self.hosts.entry(host.to_string()).or_default().push(entry),
            RouteTarget::WebSocket(_) => self.websockets.push(entry),
        }
    }
}

fn compile_cors(cors: Option<&CorsConfig>) -> Option<Arc<CorsPolicy>> {
    cors.map(|c| Arc::new(CorsPolicy::from_config(c)))
}

fn parse_target(path: &PathConfig) -> Result<RouteTarget, String> {
    let mut url = Url::parse(&path.target).map_err(|e| e.to_string())?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err("target has no host".into());
    }

    if !path.upgrade {
        return match url.scheme() {
            "http" | "https" => Ok(RouteTarget::Proxy(ProxyTarget { url })),
            other => Err(format!("unsupported proxy scheme {other}")),
        };
    }

    let listen_port = path
        .listen_port
        .filter(|p| *p != 0)
        .ok_or_else(|| "upgrade route without listen_port".to_string())?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(format!("unsupported websocket scheme {other}")),
    };
    url.set_scheme(scheme)
        .map_err(|_| format!("cannot convert target to {scheme}"))?;

    Ok(RouteTarget::WebSocket(WebSocketRoute {
        url,
        listen_port,
        tls: path.tls,
    }))
}

fn compile_resolve(config: &RoutesConfig) -> ResolveTable {
    let mut entries = HashMap::new();
    for (host, addrs) in &config.resolve {
        let parsed: Vec<IpAddr> = addrs
            .iter()
            .filter_map(|a| match a.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::error!(host = %host, address = %a, "Skipping pinned address");
                    None
                }
            })
            .collect();
        entries.insert(normalize_host(host), parsed);
    }
    ResolveTable { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomainConfig, SshTargetConfig, SubdomainConfig};

    fn path(location: &str, target: &str) -> PathConfig {
        PathConfig {
            location: location.into(),
            target: target.into(),
            ..Default::default()
        }
    }

    fn domain(name: &str, paths: Vec<PathConfig>, subdomains: Vec<SubdomainConfig>) -> DomainConfig {
        DomainConfig {
            name: name.into(),
            paths,
            cors: None,
            subdomains,
        }
    }

    fn sub(name: &str, paths: Vec<PathConfig>) -> SubdomainConfig {
        SubdomainConfig {
            name: name.into(),
            paths,
            cors: None,
        }
    }

    fn proxy_url(entry: &RouteEntry) -> &str {
        match &entry.target {
            RouteTarget::Proxy(p) => p.url().as_str(),
            RouteTarget::WebSocket(w) => w.url().as_str(),
        }
    }

    #[test]
    fn one_entry_per_host() {
        let config = RoutesConfig {
            domains: vec![domain(
                "example.com",
                vec![path("/", "http://10.0.0.1:8080")],
                vec![sub("api", vec![path("/v1", "http://10.0.0.2:9000")])],
            )],
            ..Default::default()
        };

        let table = RouteTable::compile(&config);
        assert_eq!(table.entries_for("example.com").len(), 1);
        assert_eq!(table.entries_for("api.example.com").len(), 1);
        assert_eq!(table.hostnames(), ["example.com", "api.example.com"]);

        let entry = table.resolve("api.example.com", "/v1/widgets").unwrap();
        assert_eq!(entry.prefix.as_str(), "/v1");
        assert_eq!(proxy_url(entry), "http://10.0.0.2:9000/");
    }

    #[test]
    fn malformed_target_is_skipped() {
        let config = RoutesConfig {
            domains: vec![
                domain("broken.com", vec![path("/", "::not a url")], vec![]),
                domain("ok.com", vec![path("/", "http://10.0.0.1")], vec![]),
            ],
            ..Default::default()
        };

        let table = RouteTable::compile(&config);
        assert!(table.entries_for("broken.com").is_empty());
        assert!(table.resolve("broken.com", "/").is_none());
        assert_eq!(table.entries_for("ok.com").len(), 1);
    }

    #[test]
    fn compile_is_deterministic() {
        let config = RoutesConfig {
            domains: vec![domain(
                "example.com",
                vec![path("/", "http://a"), path("/b", "http://b")],
                vec![sub("x", vec![path("/", "http://x")]), sub("y", vec![path("/", "http://y")])],
            )],
            ..Default::default()
        };

        assert_eq!(RouteTable::compile(&config), RouteTable::compile(&config));
    }

    #[test]
    fn longest_prefix_then_declaration_order() {
        let config = RoutesConfig {
            domains: vec![domain(
                "example.com",
                vec![
                    path("/", "http://root"),
                    path("/api", "http://first"),
                    path("/api", "http://second"),
                    path("/api/v2", "http://v2"),
                ],
                vec![],
            )],
            ..Default::default()
        };

        let table = RouteTable::compile(&config);
        assert_eq!(proxy_url(table.resolve("example.com", "/api/v2/x").unwrap()), "http://v2/");
        assert_eq!(proxy_url(table.resolve("example.com", "/api/v1").unwrap()), "http://first/");
        assert_eq!(proxy_url(table.resolve("example.com", "/other").unwrap()), "http://root/");
        assert!(table.resolve("unknown.com", "/").is_none());
    }

    #[test]
    fn self_subdomain_precedes_bare_paths() {
        let config = RoutesConfig {
            domains: vec![domain(
                "example.com",
                vec![path("/", "http://bare")],
                vec![sub("example.com", vec![path("/", "http://self")])],
            )],
            ..Default::default()
        };

        let table = RouteTable::compile(&config);
        let entries = table.entries_for("example.com");
        assert_eq!(entries.len(), 2);
        assert_eq!(proxy_url(&entries[0]), "http://self/");
        assert_eq!(proxy_url(table.resolve("example.com", "/").unwrap()), "http://self/");
        assert_eq!(table.hostnames(), ["example.com"]);
    }

    #[test]
    fn host_lookup_ignores_case_and_port() {
        let config = RoutesConfig {
            domains: vec![domain("Example.com", vec![path("/", "http://a")], vec![])],
            ..Default::default()
        };

        let table = RouteTable::compile(&config);
        assert!(table.resolve("EXAMPLE.com:443", "/").is_some());
    }

    #[test]
    fn upgrade_paths_become_websocket_routes() {
        let mut ws = path("/ws", "http://10.0.0.3:7000/socket");
        ws.upgrade = true;
        ws.listen_port = Some(8081);
        let mut missing_port = path("/ws2", "ws://10.0.0.3:7000");
        missing_port.upgrade = true;

        let config = RoutesConfig {
            domains: vec![domain("example.com", vec![ws, missing_port], vec![])],
            ..Default::default()
        };

        let table = RouteTable::compile(&config);
        assert!(table.entries_for("example.com").is_empty());
        assert_eq!(table.websockets().len(), 1);

        match &table.websockets()[0].target {
            RouteTarget::WebSocket(route) => {
                assert_eq!(route.url().as_str(), "ws://10.0.0.3:7000/socket");
                assert_eq!(route.listen_port, 8081);
                assert!(!route.tls);
            }
            other => panic!("unexpected target {other:?}"),
        }
    }

    #[test]
    fn resolve_table_and_ssh_snapshot() {
        let mut config = RoutesConfig::default();
        config
            .resolve
            .insert("Backend.internal".into(), vec!["10.0.0.7".into(), "bogus".into()]);
        config.ssh = Some(SshRoutesConfig {
            enabled: false,
            listen_port: 2222,
            configs: vec![SshTargetConfig {
                host: "127.0.0.1".into(),
                port: 22,
            }],
            strategy: Default::default(),
            host_key_path: "key".into(),
        });

        let table = RouteTable::compile(&config);
        let pinned = table.resolve_table();
        assert_eq!(pinned.lookup("backend.internal:80"), Some(&["10.0.0.7".parse::<IpAddr>().unwrap()][..]));
        assert_eq!(pinned.lookup("other"), None);
        assert!(table.ssh().is_none());
        assert!(!table.has_hosts());
    }
}
