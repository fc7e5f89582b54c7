//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured event records via tracing)
//!     → access_log.rs (one record per allowed HTTP request)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout / event log file
//!     → access log file (single consumer task)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Producers never wait on log I/O unless the access log policy is `block`
//! - Request ID (x-request-id) flows to backends and into trace spans

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::{AccessLog, AccessRecord};
pub use logging::init_logging;
