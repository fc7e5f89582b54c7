//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, access gate, dispatch by host + prefix)
//!     → request.rs (request ID)
//!     → proxy.rs (URI/header rewrite, backend call, CORS, 502)
//!     → response.rs (gateway-generated responses)
//!     → Send to client
//!
//! Plain HTTP listener:
//!     → redirect.rs (ACME challenge or redirect to HTTPS)
//!
//! Upgrade routes:
//!     → websocket.rs (dedicated listener, frame relay)
//! ```

pub mod proxy;
pub mod redirect;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use proxy::{PinnedResolver, ReverseProxy};
pub use redirect::redirect_router;
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{serve, HttpsServer};
pub use websocket::WebSocketListener;
