use axum::extract::State;
use axum::Json;
use chrono::Utc;

use super::super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": state.version,
        "uptime": format!("{}s", state.started_at.elapsed().as_secs()),
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
