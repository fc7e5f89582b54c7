//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept loop, connection limits)
//!     → tls.rs (optional TLS termination)
//!     → tunnel.rs (open tunnel accounting)
//!     → relay.rs (byte pumping for SSH channels)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each tunnel tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod listener;
pub mod relay;
pub mod tls;
pub mod tunnel;

pub use listener::{bind_tcp, Listener, ListenerError};
pub use tls::ServerTls;
pub use tunnel::{TunnelGuard, TunnelId, TunnelTracker};
