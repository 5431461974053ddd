//! Liveness check.

use axum::http::StatusCode;

/// Returns 200 with the text "OK" while the server is accepting connections.
///
/// Says nothing about the workflow: a session stuck in `loaderror` is still
/// live. Use `GET /api/v1/sync` for that.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
