use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{FromRequestParts, Path},
    http::{StatusCode, header, request::Parts},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{get, post},
};
use factflux_core::report_file_name;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::AppError;
use crate::state::{AppState, SessionMetrics, SessionState, SessionStatus, SseStream, StartRequest};

/// Keys are optional; whatever is missing comes from the server environment.
#[derive(Deserialize)]
pub struct StartResearchRequest {
    pub topic: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub firecrawl_api_key: Option<String>,
}

impl From<StartResearchRequest> for StartRequest {
    fn from(value: StartResearchRequest) -> Self {
        Self {
            topic: value.topic,
            openai_api_key: value.openai_api_key,
            firecrawl_api_key: value.firecrawl_api_key,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StartResearchResponse {
    pub session_id: String,
    pub state: SessionState,
    pub capacity: SessionMetrics,
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionStatus>,
    pub capacity: SessionMetrics,
}

pub fn research_router() -> Router<AppState> {
    Router::new()
        .route("/research", post(start_research).get(list_sessions))
        .route("/research/:id", get(get_session))
        .route("/research/:id/stream", get(stream_session))
        .route("/research/:id/download", get(download_report))
}

#[instrument(skip_all)]
async fn start_research(
    GuardedState(state): GuardedState,
    Json(payload): Json<StartResearchRequest>,
) -> Result<(StatusCode, Json<StartResearchResponse>), AppError> {
    let service = state.session_service();
    let session_id = service.start_session(payload.into())?;

    let session_state = service
        .status(&session_id)
        .map(|status| status.state)
        .unwrap_or(SessionState::Queued);

    let response = StartResearchResponse {
        session_id,
        state: session_state,
        capacity: service.metrics(),
    };

    Ok((StatusCode::ACCEPTED, Json(response)))
}

async fn list_sessions(GuardedState(state): GuardedState) -> Json<ListSessionsResponse> {
    let service = state.session_service();
    Json(ListSessionsResponse {
        sessions: service.list(),
        capacity: service.metrics(),
    })
}

async fn get_session(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStatus>, AppError> {
    match state.session_service().status(&session_id) {
        Some(status) => Ok(Json(status)),
        None => Err(AppError::new(StatusCode::NOT_FOUND, "session not found")),
    }
}

async fn stream_session(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
) -> Result<Sse<SseStream>, AppError> {
    state
        .session_service()
        .event_stream(&session_id)
        .map(|stream| Sse::new(stream).keep_alive(KeepAlive::new()))
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "session not found"))
}

/// The enhanced report as a markdown attachment.
async fn download_report(
    GuardedState(state): GuardedState,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let service = state.session_service();
    if let Some(outcome) = service.outcome(&session_id) {
        let disposition = format!(
            "attachment; filename=\"{}\"",
            report_file_name(&outcome.topic).replace('"', "")
        );
        return Ok((
            [
                (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            outcome.enhanced_report.clone(),
        )
            .into_response());
    }

    match service.status(&session_id) {
        Some(status) if status.state == SessionState::Failed => Err(AppError::new(
            StatusCode::CONFLICT,
            "session failed; no report available",
        )),
        Some(_) => Err(AppError::new(
            StatusCode::CONFLICT,
            "report not ready yet",
        )),
        None => Err(AppError::new(StatusCode::NOT_FOUND, "session not found")),
    }
}

pub struct GuardedState(pub AppState);

#[async_trait]
impl FromRequestParts<AppState> for GuardedState {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let app_state = state.clone();

        if let Some(expected) = app_state.auth_token() {
            let provided = parts
                .headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim);

            match provided {
                Some(token) if token == expected.as_str() => {}
                _ => {
                    return Err(AppError::new(
                        StatusCode::UNAUTHORIZED,
                        "invalid auth token",
                    ));
                }
            }
        }

        Ok(GuardedState(app_state))
    }
}
