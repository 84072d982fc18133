use axum::http::{HeaderName, Method};
use tower_http::cors::{Any, CorsLayer};

/// CORS for a machine-caller gateway: any origin, the three methods the
/// surface uses, and the credential headers agents send.
///
/// Wildcard origin means no `allow_credentials`; agent tokens travel in
/// explicit headers, not cookies, so nothing is lost.
pub fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("x-agent-token"),
            HeaderName::from_static("x-agent-id"),
        ])
        .max_age(std::time::Duration::from_secs(3600))
}
