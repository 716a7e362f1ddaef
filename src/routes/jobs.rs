use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobResult, JobStatus, JobStatusResponse};
use crate::models::job_log::Feedback;
use crate::models::request::{FeedbackRequest, JobRequest};
use crate::routes::ApiError;
use crate::services::storage::PNG_CONTENT_TYPE;

/// POST /api/v1/jobs: submit a before/after job.
///
/// Validation runs inline: rejected jobs come back `failed` with their reason,
/// accepted ones as `processing` (202) while the pipeline finishes in the background.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> Result<(StatusCode, Json<JobResult>), ApiError> {
    request.validate()?;
    let submission = request
        .into_submission()
        .map_err(|_| ApiError::BadImagePayload)?;

    let result = state.orchestrator.spawn(submission).await?;
    let status = match result.status {
        JobStatus::Processing => StatusCode::ACCEPTED,
        JobStatus::Completed => StatusCode::OK,
        JobStatus::Failed => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(result)))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state
        .orchestrator
        .get_job(job_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// GET /api/v1/jobs/{id}/image: output PNG of a completed job.
pub async fn get_job_image(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let png = state
        .orchestrator
        .output_image(job_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok((
        [
            (header::CONTENT_TYPE, PNG_CONTENT_TYPE),
            (header::CACHE_CONTROL, "private, no-store"),
        ],
        png,
    ))
}

/// POST /api/v1/jobs/{id}/feedback
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), ApiError> {
    request.validate()?;
    let feedback = state
        .orchestrator
        .add_feedback(job_id, request.rating, request.comment.unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}
