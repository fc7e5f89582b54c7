//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (supervisor.rs):
//!     Prepare TLS → Bind required listeners → Spawn all listener tasks
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Broadcast → Listeners stop accepting → Drain tunnels → Exit
//! ```
//!
//! # Design Decisions
//! - Required listeners are bound before any task is spawned
//! - Shutdown has a deadline: tasks still running after the grace period are aborted

pub mod shutdown;
pub mod signals;
pub mod supervisor;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use supervisor::{BoundAddresses, Supervisor, SupervisorError};
