//! Configuration loading from disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::security::access_control::DenyList;

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Deny list parse error: {0}")]
    DenyList(#[from] serde_json::Error),
    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// A missing file is not an error: the gateway starts with defaults and no
/// routes. Any other read failure is.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            String::new()
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let config: GatewayConfig = toml::from_str(&content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load the deny list, a JSON array of IP literals. Missing file = empty list.
pub fn load_deny_list(path: Option<&Path>) -> Result<DenyList, ConfigError> {
    let Some(path) = path else {
        return Ok(DenyList::default());
    };

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "Deny list not found, denying nobody");
            return Ok(DenyList::default());
        }
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let entries: Vec<String> = serde_json::from_str(&content)?;
    Ok(DenyList::from_entries(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_config_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert!(config.routes.domains.is_empty());
    }

    #[test]
    fn valid_config_parses() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[routes.domains]]
name = "example.com"

[[routes.domains.paths]]
location = "/"
target = "http://127.0.0.1"

[[routes.domains.subdomains]]
name = "api"

[[routes.domains.subdomains.paths]]
location = "/v1"
target = "http://127.0.0.2"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        let names: Vec<_> = config.routes.domains.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["example.com"]);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[routes.domains]\nname = ").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn deny_list_loads_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"["10.0.0.1", "10.0.0.2"]"#).unwrap();

        let list = load_deny_list(Some(file.path())).unwrap();
        assert!(list.is_denied("10.0.0.2"));
        assert!(!list.is_denied("10.0.0.3"));
    }

    #[test]
    fn missing_deny_list_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let list = load_deny_list(Some(&dir.path().join("deny.json"))).unwrap();
        assert!(list.is_empty());
        assert!(load_deny_list(None).unwrap().is_empty());
    }
}
