use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;

use crate::state::{AppState, SessionMetrics};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    metrics: SessionMetrics,
}

pub fn health_router() -> Router<AppState> {
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
}

async fn live(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        metrics: state.metrics(),
    })
}

/// Not ready while every permit is taken; new sessions would only queue.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metrics = state.metrics();
    if metrics.available_permits == 0 {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded",
                metrics,
            }),
        );
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            metrics,
        }),
    )
}
