//! Test helpers: stub generation clients, in-memory pipeline wiring and HTTP helpers
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use serde::Deserialize;
use tokio::time::sleep;
use uuid::Uuid;

use face2_pipeline::models::job_log::JobLog;
use face2_pipeline::services::composite::encode_png;
use face2_pipeline::services::generation::{
    GenerationClient, GenerationError, GenerationRequest, RetryPolicy,
};
use face2_pipeline::services::jobs::MemoryJobRepository;
use face2_pipeline::services::orchestrator::{JobOrchestrator, PipelineSettings};
use face2_pipeline::services::provenance::MemoryProvenanceStore;
use face2_pipeline::services::storage::{
    log_key, ArtifactStore, MemoryArtifactStore, StorageError,
};

/// What a [`StubGenerator`] answers.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    Succeed(Vec<u8>),
    Fail(GenerationError),
}

/// Generation client double that records every request.
pub struct StubGenerator {
    behavior: StubBehavior,
    calls: AtomicU32,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl StubGenerator {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers with a well-formed 1200px composite.
    pub fn succeeding() -> Self {
        let mut canvas = RgbaImage::from_pixel(1200, 1200, Rgba([230, 225, 220, 255]));
        for y in 0..1200 {
            for x in 598..602 {
                canvas.put_pixel(x, y, Rgba([200, 200, 200, 255]));
            }
        }
        Self::new(StubBehavior::Succeed(encode_png(&canvas).unwrap()))
    }

    pub fn failing(error: GenerationError) -> Self {
        Self::new(StubBehavior::Fail(error))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationClient for StubGenerator {
    fn name(&self) -> &str {
        "stub-image-model"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        match &self.behavior {
            StubBehavior::Succeed(bytes) => Ok(bytes.clone()),
            StubBehavior::Fail(error) => Err(error.clone()),
        }
    }
}

/// Artifact store that refuses to write output images.
#[derive(Default)]
pub struct BrokenOutputStore {
    inner: MemoryArtifactStore,
}

#[async_trait]
impl ArtifactStore for BrokenOutputStore {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
        if key.starts_with("outputs/") {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }
}

/// A fully in-memory pipeline and handles to its collaborators.
pub struct TestPipeline {
    pub orchestrator: Arc<JobOrchestrator>,
    pub generator: Arc<StubGenerator>,
    pub provenance: Arc<MemoryProvenanceStore>,
    pub artifacts: Arc<MemoryArtifactStore>,
}

impl TestPipeline {
    pub async fn job_log(&self, job_id: Uuid) -> JobLog {
        let bytes = self
            .artifacts
            .get(&log_key(job_id))
            .await
            .unwrap()
            .expect("job log persisted");
        JobLog::from_json(&bytes).unwrap()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        backoff: Duration::from_millis(1),
        timeout: Duration::from_secs(10),
    }
}

pub fn pipeline(generator: StubGenerator) -> TestPipeline {
    pipeline_with(generator, false)
}

pub fn pipeline_with(generator: StubGenerator, allow_zero_image_synthesis: bool) -> TestPipeline {
    let generator = Arc::new(generator);
    let provenance = Arc::new(MemoryProvenanceStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let orchestrator = JobOrchestrator::new(
        generator.clone(),
        provenance.clone(),
        Arc::new(MemoryJobRepository::new()),
        artifacts.clone(),
        PipelineSettings {
            allow_zero_image_synthesis,
            retry: fast_retry(),
        },
    );
    TestPipeline {
        orchestrator: Arc::new(orchestrator),
        generator,
        provenance,
        artifacts,
    }
}

/// Response body of POST /api/v1/jobs
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
    pub reason: Option<String>,
}

/// Response body of GET /api/v1/jobs/{id}
#[derive(Debug, Deserialize)]
pub struct JobStatusBody {
    pub job_id: Uuid,
    pub status: String,
    pub mode: String,
    pub output_image_ref: Option<String>,
    pub reason: Option<String>,
}

/// Submit a job with base64 images to a running server.
pub async fn submit_job(
    client: &reqwest::Client,
    base_url: &str,
    body: serde_json::Value,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let response = client
        .post(format!("{}/api/v1/jobs", base_url))
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if status.is_server_error() || status == reqwest::StatusCode::BAD_REQUEST {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }
    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job status until completed or failed (with timeout)
pub async fn poll_job_status(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusBody, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/jobs/{}", base_url, job_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let body = response.json::<JobStatusBody>().await?;
        match body.status.as_str() {
            "completed" | "failed" => return Ok(body),
            "processing" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            other => return Err(format!("Unknown job status: {}", other).into()),
        }
    }

    Err(format!("Job did not finish within {} seconds", timeout_secs).into())
}
