use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::routes::ApiError;
use crate::services::video::VideoOptions;

/// Body of `POST /api/v1/videos`: animate the output of a completed job.
#[derive(Debug, Deserialize)]
pub struct VideoRequest {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub options: VideoOptions,
}

#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub job_id: Uuid,
    pub operation: String,
    pub video_uri: String,
    pub elapsed_ms: u64,
}

/// POST /api/v1/videos: blocks until the video model finishes.
pub async fn generate_video(
    State(state): State<AppState>,
    Json(request): Json<VideoRequest>,
) -> Result<Json<VideoResponse>, ApiError> {
    let composite = state
        .orchestrator
        .output_image(request.job_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let video = state.video.generate(&composite, &request.options).await?;
    Ok(Json(VideoResponse {
        job_id: request.job_id,
        operation: video.operation,
        video_uri: video.video_uri,
        elapsed_ms: video.elapsed_ms,
    }))
}
