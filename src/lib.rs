//! Edge gateway library.
//!
//! TLS termination, host/path reverse proxying, WebSocket and SSH tunnels,
//! all behind a shared IP deny list.

pub mod certs;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;
pub mod security;
pub mod ssh;

pub use config::schema::GatewayConfig;
pub use lifecycle::{Shutdown, Supervisor};
pub use routing::RouteTable;
