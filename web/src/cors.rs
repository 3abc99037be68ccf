//! CORS policy for component APIs.
//!
//! Component APIs are called from browsers on other origins (admin consoles,
//! clients during development), so the policy is permissive: any origin, the
//! usual REST methods and the headers clients send.

use axum::http::{HeaderName, Method, header};
use tower_http::cors::{Any, CorsLayer};

/// Methods allowed on `/api`.
pub const ALLOWED_METHODS: [Method; 5] = [
    Method::POST,
    Method::GET,
    Method::OPTIONS,
    Method::PUT,
    Method::DELETE,
];

/// Request headers allowed on `/api`.
pub const ALLOWED_HEADERS: [HeaderName; 5] = [
    header::ORIGIN,
    HeaderName::from_static("x-requested-with"),
    header::CONTENT_TYPE,
    header::ACCEPT,
    header::AUTHORIZATION,
];

/// The CORS layer wrapped around the component router.
#[must_use]
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(ALLOWED_HEADERS)
}
