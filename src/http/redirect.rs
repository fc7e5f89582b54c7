//! Plain HTTP listener: ACME challenges and the redirect to HTTPS.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware,
    response::Response,
    Router,
};
use tower_http::trace::TraceLayer;

use crate::http::response;
use crate::routing::matcher::request_host;
use crate::security::access_control::access_gate_middleware;
use crate::security::AccessGate;

/// Router for the HTTP address. `challenge` is mounted first when present.
pub fn redirect_router(challenge: Option<Router>, gate: Arc<AccessGate>) -> Router {
    challenge
        .unwrap_or_default()
        .fallback(redirect_handler)
        .layer(middleware::from_fn_with_state(gate, access_gate_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn redirect_handler(request: Request<Body>) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return response::text(StatusCode::BAD_REQUEST, "Use HTTPS\n");
    }

    let Some(host) = request_host(&request) else {
        return response::text(StatusCode::BAD_REQUEST, "Use HTTPS\n");
    };
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match HeaderValue::from_str(&format!("https://{host}{path}")) {
        Ok(location) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::FOUND;
            response.headers_mut().insert(header::LOCATION, location);
            response
        }
        Err(_) => response::text(StatusCode::BAD_REQUEST, "Use HTTPS\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::connect_info::MockConnectInfo;
    use std::net::SocketAddr;
    use tower::ServiceExt;

    use crate::config::OverflowPolicy;
    use crate::observability::AccessLog;
    use crate::security::DenyList;

    fn app(deny: &[&str]) -> Router {
        let (log, _rx) = AccessLog::channel(16, OverflowPolicy::DropNewest);
        let gate = Arc::new(AccessGate::new(Arc::new(DenyList::from_entries(deny.iter().copied())), log));
        let peer: SocketAddr = "198.51.100.7:40000".parse().unwrap();
        redirect_router(None, gate).layer(MockConnectInfo(peer))
    }

    #[tokio::test]
    async fn get_is_redirected_to_https() {
        let response = app(&[])
            .oneshot(
                Request::builder()
                    .uri("/docs?page=1")
                    .header("host", "example.com:80")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "https://example.com/docs?page=1");
    }

    #[tokio::test]
    async fn post_is_refused() {
        let response = app(&[])
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/form")
                    .header("host", "example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Use HTTPS\n");
    }

    #[tokio::test]
    async fn denied_client_gets_nothing() {
        let response = app(&["198.51.100.7"])
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("host", "example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }
}
