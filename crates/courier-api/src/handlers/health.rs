//! Liveness and readiness probes.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

use crate::server::AppState;

/// Liveness probe. Answers as long as the process serves requests.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Readiness probe. Exercises the storage path behind the engines so a
/// broken backend flips the endpoint before traffic arrives.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    match state.queues.list_queues().await {
        Ok(_) => Ok(Json(json!({ "status": "ready" }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
