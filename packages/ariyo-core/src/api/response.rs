//! HTTP response helper functions for consistent API responses.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::{json, Value};

/// Standard API success response with JSON data.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// Standard API error response.
///
/// The body is `{ "error": message, "code": code }`, plus `detail` when given.
pub fn api_error(
    status: StatusCode,
    code: &str,
    message: impl std::fmt::Display,
    detail: Option<&str>,
) -> impl IntoResponse {
    let mut body = json!({
        "error": message.to_string(),
        "code": code,
    });
    if let (Some(detail), Value::Object(map)) = (detail, &mut body) {
        map.insert("detail".into(), Value::String(detail.to_string()));
    }
    (status, Json(body))
}
