//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RoutesConfig
//!     → fold self subdomains and bare paths per domain
//!     → parse targets, skip malformed paths
//!     → Freeze as immutable RouteTable (+ hostnames, resolve table)
//!
//! Incoming Request (host, path):
//!     → matcher.rs (normalize host, prefix test)
//!     → table.rs (host lookup, longest prefix)
//!     → Return: RouteEntry or no match (404)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always compiles to the same table

pub mod matcher;
pub mod table;

pub use table::{ProxyTarget, ResolveTable, RouteEntry, RouteTable, RouteTarget, WebSocketRoute};
