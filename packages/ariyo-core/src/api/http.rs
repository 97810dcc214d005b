//! Router construction and the liveness handler.

use axum::{
    http::{header, Method},
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::proxy::proxy_audio;
use crate::api::response::api_success;
use crate::api::ProxyState;
use crate::protocol_constants::{DEFAULT_PROXY_BASE, SERVICE_ID};

/// Creates the Axum router with all routes.
///
/// The proxy route accepts any method; the handler answers 405 itself.
pub fn create_router(state: ProxyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD])
        .allow_headers([header::RANGE])
        .expose_headers([
            header::CONTENT_LENGTH,
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
        ]);

    Router::new()
        .route("/health", get(health_check))
        .route(DEFAULT_PROXY_BASE, any(proxy_audio))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness probe: always 200 while the server is responding.
async fn health_check() -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
    }))
}
