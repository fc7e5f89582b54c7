//! Certificate subsystem.
//!
//! # Data Flow
//! ```text
//! RouteTable hostnames
//!     → manager.rs (ACME state, HTTP-01 challenge router, acceptor)
//!     → whitelist.rs (SNI check before the ACME resolver)
//!     → HTTPS / WebSocket listeners
//! ```

pub mod manager;
pub mod whitelist;

pub use manager::{AcmeDriver, CertError, CertificateManager, ACME_CHALLENGE_ROUTE};
pub use whitelist::HostWhitelist;
