//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request / connection:
//!     → access_control.rs (resolve client IP, check deny list)
//!     → Pass to routing
//! Outbound request:
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//! Response:
//!     → cors.rs (clear and reapply Access-Control-*)
//! ```
//!
//! # Design Decisions
//! - Deny list is consulted before any routing or backend contact
//! - Denials are routine: no error logging, just a metric
//! - CORS headers are owned by the gateway, never trusted from backends

pub mod access_control;
pub mod cors;
pub mod headers;

pub use access_control::{client_ip, AccessGate, DenyList};
pub use cors::CorsPolicy;
