pub mod health;
pub mod jobs;
pub mod metrics;
pub mod videos;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::orchestrator::{FeedbackError, OrchestratorError};
use crate::services::video::VideoError;

/// Errors returned by route handlers. Internal details are logged, never sent.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Malformed image payload")]
    BadImagePayload,

    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(&'static str),

    #[error("Upstream model unavailable: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<&'a str>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadImagePayload => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error, detail) = match &self {
            Self::Validation(report) => ("invalid-request", Some(report.as_str())),
            Self::BadImagePayload => ("bad-image-payload", None),
            Self::NotFound => ("not-found", None),
            Self::Conflict(reason) => ("conflict", Some(*reason)),
            Self::Upstream(_) => ("upstream-unavailable", None),
            Self::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                ("unavailable", None)
            }
        };
        (status, Json(ErrorBody { error, detail })).into_response()
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        Self::Validation(report.to_string())
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<FeedbackError> for ApiError {
    fn from(e: FeedbackError) -> Self {
        match e {
            FeedbackError::NotFound(_) => Self::NotFound,
            FeedbackError::NotFinished(_) => Self::Conflict("job has not finished"),
            FeedbackError::LogMissing(_) | FeedbackError::Internal(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<VideoError> for ApiError {
    fn from(e: VideoError) -> Self {
        tracing::warn!(error = %e, "Video generation failed");
        Self::Upstream(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::Validation("variation".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(FeedbackError::NotFound(Uuid::nil())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(FeedbackError::NotFinished(Uuid::nil())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(VideoError::NoVideo).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
