//! SSH tunnel subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (connection limit, deny check, russh session)
//!     → handler.rs (no-auth handshake, session channels only)
//!     → forward.rs (dial backends, relay channel bytes)
//! ```

pub mod forward;
pub mod handler;
pub mod server;

pub use forward::Forwarder;
pub use server::{load_or_generate_host_key, SshError, SshServer};
