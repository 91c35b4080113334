use axum::http::{Method, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{jobs, sessions, system, vehicles};
use super::AppState;

// The API is consumed by browser dashboards on arbitrary origins, so CORS
// is wide open. OPTIONS preflights are answered by the layer itself.
fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/vehicle/data", get(vehicles::fetch_vehicle_data))
        .route("/v1/job/{id}", get(jobs::get_job))
        .route("/v1/jobs", get(jobs::list_jobs))
        .route("/v1/session/check", get(sessions::check_session))
        .route(
            "/v1/session/clear",
            axum::routing::delete(sessions::clear_session),
        )
        .route("/health", get(system::health))
        .route("/metrics", get(system::metrics))
        .fallback(not_found)
        .layer(build_cors())
        .with_state(state)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Endpoint not found" })),
    )
}
