//! Header manipulation for proxied requests.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Propagate X-Forwarded, X-Forwarded-For, X-Forwarded-Host, X-Forwarded-Proto
//!
//! # Design Decisions
//! - Client IP appended to the inbound X-Forwarded-For chain, never replacing it
//! - X-Forwarded-Host / X-Forwarded-Proto describe this hop (inbound Host, listener scheme)

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED: HeaderName = HeaderName::from_static("x-forwarded");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
    headers.remove("proxy-connection");
}

/// Rewrite forwarding headers on an outbound request.
///
/// `inbound_host` is the Host the client asked for, `client_ip` the socket
/// peer, `proto` the scheme of the listener that accepted the request.
pub fn set_forwarded(headers: &mut HeaderMap, inbound_host: Option<&str>, client_ip: &str, proto: &str) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    let chain = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    match inbound_host.and_then(|h| HeaderValue::from_str(h).ok()) {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host);
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }

    if let Ok(proto) = HeaderValue::from_str(proto) {
        headers.insert(X_FORWARDED_PROTO, proto);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_standard_and_listed_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, "keep-alive, x-session-hint".parse().unwrap());
        headers.insert("keep-alive", "timeout=5".parse().unwrap());
        headers.insert("x-session-hint", "abc".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn appends_client_to_forwarded_chain() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "203.0.113.1".parse().unwrap());
        headers.insert(X_FORWARDED, "true".parse().unwrap());

        set_forwarded(&mut headers, Some("api.example.com"), "198.51.100.7", "https");

        assert_eq!(headers[&X_FORWARDED_FOR], "203.0.113.1, 198.51.100.7");
        assert_eq!(headers[&X_FORWARDED_HOST], "api.example.com");
        assert_eq!(headers[&X_FORWARDED_PROTO], "https");
        assert_eq!(headers[&X_FORWARDED], "true");
    }

    #[test]
    fn starts_chain_when_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_HOST, "spoofed".parse().unwrap());

        set_forwarded(&mut headers, None, "198.51.100.7", "http");

        assert_eq!(headers[&X_FORWARDED_FOR], "198.51.100.7");
        assert!(!headers.contains_key(&X_FORWARDED_HOST));
        assert_eq!(headers[&X_FORWARDED_PROTO], "http");
    }
}
