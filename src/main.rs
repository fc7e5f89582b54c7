//! Edge gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────────┐
//!                    │                     EDGE GATEWAY                     │
//!                    │                                                      │
//!   :80  ───────────▶│ redirect ── ACME HTTP-01 challenge                   │
//!                    │                                                      │
//!   :443 ───────────▶│ access gate ─▶ route table ─▶ reverse proxy ─────────┼──▶ HTTP backends
//!                    │      │                                               │
//!   :port (per WS) ─▶│      ├─────▶ WebSocket listener ─▶ tunnel ───────────┼──▶ WS backends
//!                    │      │                                               │
//!   :ssh ───────────▶│      └─────▶ SSH server ─▶ forwarder ────────────────┼──▶ TCP backends
//!                    │                                                      │
//!                    │  certs (ACME / static)   lifecycle (supervisor)      │
//!                    │  observability (events, access log, metrics)         │
//!                    └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use edge_gateway::config::{load_config, load_deny_list};
use edge_gateway::lifecycle::{wait_for_signal, Shutdown, Supervisor};
use edge_gateway::net::tls::install_crypto_provider;
use edge_gateway::observability::{init_logging, metrics, AccessLog};
use edge_gateway::routing::RouteTable;
use edge_gateway::security::AccessGate;

#[derive(Parser)]
#[command(name = "edge-gateway")]
#[command(about = "TLS-terminating edge gateway with WebSocket and SSH tunnels", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    init_logging(&config.logging)?;
    install_crypto_provider();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "edge-gateway starting"
    );

    let deny_list = Arc::new(load_deny_list(config.deny_list.as_deref())?);
    let routes = Arc::new(RouteTable::compile(&config.routes));

    tracing::info!(
        https_address = %config.server.https_address,
        http_address = %config.server.http_address,
        tls_mode = ?config.tls.mode,
        denied_addresses = deny_list.len(),
        "Configuration loaded"
    );

    if config.metrics.enabled {
        match config.metrics.address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.metrics.address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (access_log, access_log_task) = AccessLog::spawn(&config.logging);
    let gate = Arc::new(AccessGate::new(deny_list, access_log));

    let shutdown = Shutdown::new();
    let mut supervisor = Supervisor::start(&config, routes, gate, &shutdown).await?;

    let outcome = tokio::select! {
        result = supervisor.wait() => result,
        _ = wait_for_signal() => Ok(()),
    };

    shutdown.trigger();
    supervisor
        .drain(Duration::from_secs(config.server.shutdown_grace_secs))
        .await;

    // Every producer is gone once the listeners have ended; let the queue flush.
    if tokio::time::timeout(Duration::from_secs(1), access_log_task).await.is_err() {
        tracing::warn!("Access log not flushed before exit");
    }

    outcome?;
    tracing::info!("Shutdown complete");
    Ok(())
}
