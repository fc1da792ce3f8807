use axum::{Json, http::StatusCode, response::IntoResponse};
use factflux_core::{FactFluxError, redact};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(error: impl ToString) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let payload = ErrorResponse {
            error: redact(&self.message),
        };
        (self.status, Json(payload)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::internal(format!("{error:#}"))
    }
}

/// Preflight failures are the caller's fault; anything else is ours.
impl From<FactFluxError> for AppError {
    fn from(error: FactFluxError) -> Self {
        let status = if error.is_preflight() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, error.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_errors_are_bad_requests() {
        let err = AppError::from(FactFluxError::MissingSecret("OPENAI_API_KEY".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = AppError::from(FactFluxError::Pipeline("boom".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
