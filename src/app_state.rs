use std::sync::Arc;

use crate::services::{orchestrator::JobOrchestrator, video::VideoClient};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<JobOrchestrator>,
    pub video: Arc<VideoClient>,
}

impl AppState {
    pub fn new(orchestrator: JobOrchestrator, video: VideoClient) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            video: Arc::new(video),
        }
    }
}
