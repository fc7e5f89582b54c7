//! Cross-origin response policy.
//!
//! Every response of a host with a policy, proxy errors included, has its
//! `Access-Control-*` headers cleared and rewritten from the policy. Backends
//! cannot widen what the gateway allows.

use axum::http::{header, HeaderMap, HeaderValue};

use crate::config::CorsConfig;

const CORS_HEADERS: [header::HeaderName; 6] = [
    header::ACCESS_CONTROL_ALLOW_ORIGIN,
    header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
    header::ACCESS_CONTROL_ALLOW_METHODS,
    header::ACCESS_CONTROL_ALLOW_HEADERS,
    header::ACCESS_CONTROL_EXPOSE_HEADERS,
    header::ACCESS_CONTROL_MAX_AGE,
];

/// Compiled CORS policy of one host.
#[derive(Debug, Clone, PartialEq)]
pub struct CorsPolicy {
    allow_origins: Vec<String>,
    allow_credentials: bool,
    allow_methods: Option<HeaderValue>,
    allow_headers: Option<HeaderValue>,
    expose_headers: Option<HeaderValue>,
    max_age: Option<HeaderValue>,
}

impl CorsPolicy {
    pub fn from_config(config: &CorsConfig) -> Self {
        Self {
            allow_origins: config.allow_origins.clone(),
            allow_credentials: config.allow_credentials,
            allow_methods: joined(&config.allow_methods),
            allow_headers: joined(&config.allow_headers),
            expose_headers: joined(&config.expose_headers),
            max_age: (config.max_age > 0).then(|| HeaderValue::from(config.max_age)),
        }
    }

    /// Clear and reapply the policy headers for a request carrying `origin`.
    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        for name in &CORS_HEADERS {
            headers.remove(name);
        }

        let (allow_origin, vary) =
            allowed_origin(origin.unwrap_or_default(), &self.allow_origins, self.allow_credentials);
        if let Some(value) = allow_origin.and_then(|o| HeaderValue::from_str(&o).ok()) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
            if vary {
                headers.append(header::VARY, HeaderValue::from_static("Origin"));
            }
        }

        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }

        for (name, value) in [
            (header::ACCESS_CONTROL_ALLOW_METHODS, &self.allow_methods),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, &self.allow_headers),
            (header::ACCESS_CONTROL_EXPOSE_HEADERS, &self.expose_headers),
            (header::ACCESS_CONTROL_MAX_AGE, &self.max_age),
        ] {
            if let Some(value) = value {
                headers.insert(name, value.clone());
            }
        }
    }
}

fn joined(values: &[String]) -> Option<HeaderValue> {
    if values.is_empty() {
        return None;
    }
    HeaderValue::from_str(&values.join(", ")).ok()
}

/// Which `Access-Control-Allow-Origin` to send, and whether to add `Vary: Origin`.
///
/// The first allow-list entry that matches decides: `*` yields a literal `*`
/// without credentials and echoes the origin with them.
pub fn allowed_origin(origin: &str, allow_origins: &[String], allow_credentials: bool) -> (Option<String>, bool) {
    if origin.is_empty() || allow_origins.is_empty() {
        return (None, false);
    }

    for allowed in allow_origins {
        if allowed == "*" {
            if allow_credentials {
                return (Some(origin.to_string()), true);
            }
            return (Some("*".to_string()), false);
        }
        if allowed == origin {
            return (Some(origin.to_string()), true);
        }
    }

    (None, false)
}
