use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use super::super::AppState;

#[derive(Deserialize)]
pub struct SessionQuery {
    session_id: Option<String>,
}

pub async fn check_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let session_id = match query.session_id.as_deref() {
        Some(id) if !id.is_empty() => id,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "is_valid": false,
                    "message": "session_id query parameter is required"
                })),
            );
        }
    };

    match state.storage.get_session(session_id).await {
        Ok(Some(session)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "is_valid": true,
                "message": "Session is valid",
                "expires_at": session.expires_at.to_rfc3339(),
            })),
        ),
        Ok(None) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "is_valid": false,
                "message": "Session not found or expired"
            })),
        ),
        Err(e) => {
            warn!("Session lookup failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "is_valid": false,
                    "message": format!("Failed to check session: {}", e)
                })),
            )
        }
    }
}

pub async fn clear_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let session_id = match query.session_id.as_deref() {
        Some(id) if !id.is_empty() => id,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "success": false,
                    "message": "session_id query parameter is required"
                })),
            );
        }
    };

    match state.storage.delete_session(session_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "message": "Session cleared"
            })),
        ),
        Err(e) => {
            warn!("Session delete failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "message": format!("Failed to clear session: {}", e)
                })),
            )
        }
    }
}
