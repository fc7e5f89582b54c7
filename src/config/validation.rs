//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate listener addresses and the SSH block
//! - Detect duplicate domains
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Per-path problems (bad target, missing listen port) are NOT validation
//!   errors: the route table skips those paths and keeps loading
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, TlsMode};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("domain #{0} has an empty name")]
    EmptyDomainName(usize),
    #[error("domain {0} declared more than once")]
    DuplicateDomain(String),
    #[error("static TLS mode requires tls.cert_path and tls.key_path")]
    MissingStaticCertificate,
    #[error("ssh.listen_port must be non-zero")]
    SshPortZero,
    #[error("ssh is enabled but has no backend configs")]
    SshWithoutTargets,
    #[error("logging.queue_capacity must be at least 1")]
    ZeroQueueCapacity,
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("server.http_address", &config.server.http_address),
        ("server.https_address", &config.server.https_address),
    ] {
        if value.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                field,
                value: value.clone(),
            });
        }
    }

    if config.metrics.enabled && config.metrics.address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "metrics.address",
            value: config.metrics.address.clone(),
        });
    }

    if config.tls.mode == TlsMode::Static
        && (config.tls.cert_path.is_none() || config.tls.key_path.is_none())
    {
        errors.push(ValidationError::MissingStaticCertificate);
    }

    if config.logging.queue_capacity == 0 {
        errors.push(ValidationError::ZeroQueueCapacity);
    }

    let mut seen = HashSet::new();
    for (i, domain) in config.routes.domains.iter().enumerate() {
        if domain.name.trim().is_empty() {
            errors.push(ValidationError::EmptyDomainName(i));
        } else if !seen.insert(domain.name.to_lowercase()) {
            errors.push(ValidationError::DuplicateDomain(domain.name.clone()));
        }
    }

    if let Some(ssh) = config.routes.ssh.as_ref().filter(|s| s.enabled) {
        if ssh.listen_port == 0 {
            errors.push(ValidationError::SshPortZero);
        }
        if ssh.configs.is_empty() {
            errors.push(ValidationError::SshWithoutTargets);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{DomainConfig, SshRoutesConfig};

    fn domain(name: &str) -> DomainConfig {
        DomainConfig {
            name: name.into(),
            paths: vec![],
            cors: None,
            subdomains: vec![],
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.server.https_address = "not-an-address".into();
        config.routes.domains = vec![domain("example.com"), domain("EXAMPLE.com"), domain(" ")];
        config.routes.ssh = Some(SshRoutesConfig {
            enabled: true,
            listen_port: 0,
            configs: vec![],
            strategy: Default::default(),
            host_key_path: "key".into(),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::DuplicateDomain("EXAMPLE.com".into())));
        assert!(errors.contains(&ValidationError::EmptyDomainName(2)));
        assert!(errors.contains(&ValidationError::SshPortZero));
    }

    #[test]
    fn disabled_ssh_is_not_checked() {
        let mut config = GatewayConfig::default();
        config.routes.ssh = Some(SshRoutesConfig {
            enabled: false,
            listen_port: 0,
            configs: vec![],
            strategy: Default::default(),
            host_key_path: "key".into(),
        });
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn static_tls_needs_files() {
        let mut config = GatewayConfig::default();
        config.tls.mode = TlsMode::Static;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::MissingStaticCertificate]
        );
    }
}
