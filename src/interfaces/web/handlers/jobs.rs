use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::super::AppState;

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.jobs.get_job(&id).await {
        Some(job) => (
            StatusCode::OK,
            Json(serde_json::to_value(&job).unwrap_or_default()),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Job {} not found", id) })),
        ),
    }
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<serde_json::Value> {
    let jobs = state.jobs.list_jobs().await;
    let count = jobs.len();
    Json(serde_json::json!({
        "jobs": jobs,
        "count": count,
    }))
}
