use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use super::super::AppState;

/// Kicks off an asynchronous retrieval and hands the caller a job id to
/// poll. The actual browser work happens in the job's background task.
pub async fn fetch_vehicle_data(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = state.jobs.create_job().await;
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "job_id": job_id,
            "status": "pending",
            "message": "Vehicle data retrieval started. Poll /v1/job/{id} for the result."
        })),
    )
}
