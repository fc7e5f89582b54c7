use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use edge_gateway::config::load_config;
use edge_gateway::routing::{RouteEntry, RouteTable, RouteTarget};

#[derive(Parser)]
#[command(name = "gatewayctl")]
#[command(about = "Offline inspection of an edge-gateway configuration", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "gateway.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and summarize what would be served
    Check,
    /// List the hostnames certificates would be requested for
    Hosts,
    /// List every compiled route
    Routes,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let table = RouteTable::compile(&config.routes);

    let output = match cli.command {
        Commands::Check => json!({
            "config": cli.config.display().to_string(),
            "tls_mode": config.tls.mode,
            "hostnames": table.hostnames().len(),
            "http_routes": table.hostnames().iter().map(|h| table.entries_for(h).len()).sum::<usize>(),
            "websocket_listeners": table.websockets().len(),
            "ssh": table.ssh().map(|ssh| json!({
                "listen_port": ssh.listen_port,
                "backends": ssh.configs.len(),
                "strategy": ssh.strategy,
            })),
        }),
        Commands::Hosts => json!(table.hostnames()),
        Commands::Routes => {
            let mut routes: Vec<Value> = table
                .hostnames()
                .iter()
                .flat_map(|host| table.entries_for(host))
                .map(describe)
                .collect();
            routes.extend(table.websockets().iter().map(describe));
            Value::Array(routes)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn describe(entry: &RouteEntry) -> Value {
    let mut route = json!({
        "host": entry.host,
        "location": entry.prefix.as_str(),
        "cors": entry.cors.is_some(),
    });
    match &entry.target {
        RouteTarget::Proxy(target) => {
            route["kind"] = json!("proxy");
            route["target"] = json!(target.url().as_str());
        }
        RouteTarget::WebSocket(ws) => {
            route["kind"] = json!("websocket");
            route["target"] = json!(ws.url().as_str());
            route["listen_port"] = json!(ws.listen_port);
            route["tls"] = json!(ws.tls);
        }
    }
    route
}
