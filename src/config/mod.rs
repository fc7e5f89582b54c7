//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)          deny list (JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → RouteTable::compile / DenyList shared via Arc
//! ```
//!
//! # Design Decisions
//! - Config is loaded once at startup; there is no reload
//! - All fields have defaults to allow minimal configs
//! - A missing config or deny-list file means "empty", anything else unreadable is fatal

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_deny_list, ConfigError};
pub use schema::{
    AcmeConfig, CorsConfig, DomainConfig, GatewayConfig, LogFormat, LoggingConfig,
    MetricsConfig, OverflowPolicy, PathConfig, RoutesConfig, ServerConfig, SshRoutesConfig,
    SshStrategy, SshTargetConfig, SubdomainConfig, TlsConfig, TlsMode,
};
