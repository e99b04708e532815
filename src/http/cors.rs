//! Cross-origin header injection.
//!
//! The three `Access-Control-Allow-*` headers are set by an outer layer so
//! they appear on every response: handler output, mapped errors and
//! preflight answers alike. The preflight short-circuit itself lives in the
//! dispatcher.

use axum::{
    http::{header, HeaderName, HeaderValue},
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::CorsConfig;

fn header_layer(router: Router, name: HeaderName, value: &str) -> Router {
    match HeaderValue::from_str(value) {
        Ok(value) => router.layer(SetResponseHeaderLayer::overriding(name, value)),
        Err(_) => {
            tracing::warn!(header = %name, value, "Skipping CORS header with invalid value");
            router
        }
    }
}

/// Wrap `router` with the configured CORS response headers.
pub fn apply(router: Router, cors: &CorsConfig) -> Router {
    let router = header_layer(router, header::ACCESS_CONTROL_ALLOW_ORIGIN, &cors.origin);
    let router = header_layer(router, header::ACCESS_CONTROL_ALLOW_HEADERS, &cors.allow_headers);
    if cors.allow_credentials {
        header_layer(router, header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true")
    } else {
        router
    }
}
