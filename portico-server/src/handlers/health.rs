use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde_json::json;

use crate::router::AppState;

/// `GET /health` -- liveness probe with version and uptime.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "uptime": format!("{}s", state.start_time.elapsed().as_secs()),
    }))
}

/// `GET /ready` -- readiness probe.
pub async fn ready() -> impl IntoResponse {
    Json(json!({"status": "ready"}))
}
