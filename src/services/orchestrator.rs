//! Job state machine: validate, build, generate, fall back, persist.
//!
//! Collaborators are injected as trait objects so the whole pipeline runs
//! against in-memory stores and stub generation clients in tests.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::image::{ContentHash, ImageRecord, ImageSlot, JobImages, Provenance};
use crate::models::job::{FailureReason, Job, JobResult, JobStatus};
use crate::models::job_log::{Feedback, GenerationPath, JobLog, Rating};
use crate::models::request::{JobSubmission, Mode};
use crate::services::composite::{decode_image, encode_png, CompositeBuilder};
use crate::services::fallback::FallbackEngine;
use crate::services::generation::{
    generate_with_retry, GenerationClient, GenerationError, GenerationRequest, RetryPolicy,
};
use crate::services::input_validator::InputValidator;
use crate::services::jobs::{JobRepository, RepositoryError};
use crate::services::prompt_policy::{self, POLICY_VERSION, SIMILARITY_GUARD_MAX_ATTEMPTS};
use crate::services::provenance::{ProvenanceStore, StoreError};
use crate::services::storage::{
    log_key, output_key, ArtifactStore, StorageError, JSON_CONTENT_TYPE, PNG_CONTENT_TYPE,
};

/// Deployment knobs for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub allow_zero_image_synthesis: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            allow_zero_image_synthesis: false,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of the validation stage.
enum Admission {
    Rejected(Job),
    Accepted(Box<OpenJob>),
}

/// A validated job on its way to a terminal state.
struct OpenJob {
    job: Job,
    log: JobLog,
    images: JobImages,
    started: Instant,
}

/// Image produced by the generation or fallback stage, as PNG.
struct ProducedImage {
    png: Vec<u8>,
    path: GenerationPath,
    degraded_guarantee: bool,
}

pub struct JobOrchestrator {
    validator: InputValidator,
    model_input: CompositeBuilder,
    output_canvas: CompositeBuilder,
    fallback: FallbackEngine,
    generation: Arc<dyn GenerationClient>,
    provenance: Arc<dyn ProvenanceStore>,
    jobs: Arc<dyn JobRepository>,
    artifacts: Arc<dyn ArtifactStore>,
    retry: RetryPolicy,
    /// Serializes read-modify-write of stored job logs.
    log_writes: Mutex<()>,
}

impl JobOrchestrator {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        provenance: Arc<dyn ProvenanceStore>,
        jobs: Arc<dyn JobRepository>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            validator: InputValidator::new(settings.allow_zero_image_synthesis),
            model_input: CompositeBuilder::model_input(),
            output_canvas: CompositeBuilder::output(),
            fallback: FallbackEngine::new(),
            generation,
            provenance,
            jobs,
            artifacts,
            retry: settings.retry,
            log_writes: Mutex::new(()),
        }
    }

    /// Run a job to its terminal state.
    pub async fn submit(&self, submission: JobSubmission) -> Result<JobResult, OrchestratorError> {
        match self.admit(submission).await? {
            Admission::Rejected(job) => Ok(JobResult::from(&job)),
            Admission::Accepted(open) => {
                let span = info_span!("job", job_id = %open.job.id, mode = %open.job.mode);
                Ok(self.process(*open).instrument(span).await)
            }
        }
    }

    /// Validate synchronously, then finish the job on a background task.
    ///
    /// Rejected jobs come back already failed; accepted ones as `processing`.
    pub async fn spawn(
        self: &Arc<Self>,
        submission: JobSubmission,
    ) -> Result<JobResult, OrchestratorError> {
        match self.admit(submission).await? {
            Admission::Rejected(job) => Ok(JobResult::from(&job)),
            Admission::Accepted(open) => {
                let result = JobResult::from(&open.job);
                let span = info_span!("job", job_id = %open.job.id, mode = %open.job.mode);
                let this = Arc::clone(self);
                tokio::spawn(
                    async move {
                        this.process(*open).await;
                    }
                    .instrument(span),
                );
                Ok(result)
            }
        }
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, OrchestratorError> {
        Ok(self.jobs.get(job_id).await?)
    }

    /// Output PNG of a completed job.
    pub async fn output_image(&self, job_id: Uuid) -> Result<Option<Vec<u8>>, OrchestratorError> {
        match self.jobs.get(job_id).await? {
            Some(job) if job.status == JobStatus::Completed => {
                Ok(self.artifacts.get(&output_key(job_id)).await?)
            }
            _ => Ok(None),
        }
    }

    /// Append feedback to a finished job's log. Never touches job status.
    pub async fn add_feedback(
        &self,
        job_id: Uuid,
        rating: Rating,
        comment: String,
    ) -> Result<Feedback, FeedbackError> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .map_err(OrchestratorError::from)?
            .ok_or(FeedbackError::NotFound(job_id))?;
        if !job.status.is_terminal() {
            return Err(FeedbackError::NotFinished(job_id));
        }

        let _guard = self.log_writes.lock().await;
        let key = log_key(job_id);
        let stored = self
            .artifacts
            .get(&key)
            .await
            .map_err(OrchestratorError::from)?
            .ok_or(FeedbackError::LogMissing(job_id))?;
        let mut log = JobLog::from_json(&stored).map_err(OrchestratorError::from)?;

        let feedback = Feedback {
            job_id,
            rating,
            comment,
            timestamp: Utc::now(),
        };
        log.feedback.push(feedback.clone());
        self.write_log(&log).await?;

        info!(job_id = %job_id, rating = %rating, "Feedback recorded");
        Ok(feedback)
    }

    pub async fn health_check(&self) -> Result<(), OrchestratorError> {
        Ok(self.jobs.health_check().await?)
    }

    async fn admit(&self, submission: JobSubmission) -> Result<Admission, OrchestratorError> {
        let started = Instant::now();
        let JobSubmission {
            mode,
            images,
            parameters,
            consent_confirmed: _,
        } = &submission;
        metrics::counter!("face2_jobs_submitted_total", "mode" => mode.to_string()).increment(1);

        let mut job = Job::new(*mode, parameters.clone());
        let mut log = JobLog::new(job.id, *mode, parameters, POLICY_VERSION);
        log.ai_service = self.generation.name().to_string();
        debug!(job_id = %job.id, mode = %mode, images = images.count(), "Validating job");

        let validated = self
            .validator
            .validate(&submission, self.provenance.as_ref())
            .await;
        log.record_stage("validating", started.elapsed().as_millis() as u64);

        let inputs = match validated {
            Ok(inputs) => inputs,
            Err(e) => {
                let reason = e.reason();
                warn!(job_id = %job.id, mode = %mode, reason = %reason, error = %e, "Job rejected");
                log.status = JobStatus::Failed;
                log.failure_reason = Some(reason);
                log.processing_time_ms = started.elapsed().as_millis() as u64;
                log.completed_at = Some(Utc::now());
                let log_ref = match self.write_log(&log).await {
                    Ok(locator) => Some(locator),
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "Could not persist job log");
                        None
                    }
                };
                job.fail(reason, log_ref)?;
                self.jobs.insert(&job).await?;
                metrics::counter!("face2_jobs_failed_total", "reason" => reason.to_string())
                    .increment(1);
                return Ok(Admission::Rejected(job));
            }
        };

        job.before_hash = inputs.hash_of(ImageSlot::Before).cloned();
        job.after_hash = inputs.hash_of(ImageSlot::After).cloned();
        log.input_hashes = inputs.hashes.iter().map(|(_, h)| h.clone()).collect();
        for (_, hash) in &inputs.hashes {
            let record = ImageRecord::new(hash.clone(), Provenance::Original, Some(job.id));
            if let Err(e) = self.provenance.insert_if_absent(record).await {
                warn!(job_id = %job.id, error = %e, "Could not register original input");
            }
        }

        self.jobs.insert(&job).await?;
        Ok(Admission::Accepted(Box::new(OpenJob {
            job,
            log,
            images: submission.images,
            started,
        })))
    }

    async fn process(&self, open: OpenJob) -> JobResult {
        let OpenJob {
            mut job,
            mut log,
            images,
            started,
        } = open;

        let produced = match self.generate(&job, &mut log, &images).await {
            Ok(image) => Ok(image),
            Err(e) => {
                warn!(job_id = %job.id, error = e.tag(), "Generation failed, using fallback");
                log.fallback = true;
                log.fallback_reason = Some(e.tag().to_string());
                self.run_fallback(&job, &mut log, &images)
            }
        };

        let persisted = match produced {
            Ok(image) => self.persist(&mut job, &mut log, image, started).await,
            Err(e) => Err(e),
        };

        if let Err(e) = persisted {
            error!(job_id = %job.id, error = %e, "Job failed after validation");
            self.fail_open_job(&mut job, &mut log, started).await;
        }
        JobResult::from(&job)
    }

    /// Build the model input, render the prompt and call the model.
    async fn generate(
        &self,
        job: &Job,
        log: &mut JobLog,
        images: &JobImages,
    ) -> Result<ProducedImage, GenerationError> {
        let stage = Instant::now();
        let model_image = match (&images.before, &images.after) {
            (Some(before), Some(after)) => {
                let composite = self
                    .model_input
                    .compose_encoded(before, after)
                    .map_err(|e| GenerationError::Permanent(e.to_string()))?;
                self.register_derivative(&composite, job.id).await;
                Some(composite)
            }
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (None, None) => None,
        };
        log.record_stage("building", stage.elapsed().as_millis() as u64);
        debug!(job_id = %job.id, has_image = model_image.is_some(), "Model input built");

        let prompt = prompt_policy::render(job.mode, &job.parameters);
        if job.mode == Mode::Anonymize {
            log.similarity_guard_max_attempts = Some(SIMILARITY_GUARD_MAX_ATTEMPTS);
        }
        let request = GenerationRequest {
            image: model_image,
            policy_text: prompt.policy_text,
            directive: prompt.directive,
        };

        let stage = Instant::now();
        let outcome = generate_with_retry(self.generation.as_ref(), &request, &self.retry).await;
        log.generation_attempts = outcome.attempts;
        log.record_stage("generating", stage.elapsed().as_millis() as u64);

        let bytes = outcome.result?;
        let decoded = decode_image(&bytes).map_err(|_| GenerationError::EmptyResponse)?;
        let png = encode_png(&self.output_canvas.conform(&decoded))
            .map_err(|e| GenerationError::Permanent(e.to_string()))?;
        Ok(ProducedImage {
            png,
            path: GenerationPath::Ai,
            degraded_guarantee: false,
        })
    }

    fn run_fallback(
        &self,
        job: &Job,
        log: &mut JobLog,
        images: &JobImages,
    ) -> Result<ProducedImage, PipelineError> {
        let stage = Instant::now();
        let output = self.fallback.produce(job.mode, &job.parameters, images)?;
        log.record_stage("falling_back", stage.elapsed().as_millis() as u64);
        if output.degraded_guarantee {
            warn!(job_id = %job.id, path = %output.path, "Fallback output carries no privacy guarantee");
        }
        Ok(ProducedImage {
            png: output.png,
            path: output.path,
            degraded_guarantee: output.degraded_guarantee,
        })
    }

    async fn persist(
        &self,
        job: &mut Job,
        log: &mut JobLog,
        image: ProducedImage,
        started: Instant,
    ) -> Result<(), PipelineError> {
        let stage = Instant::now();
        let output_hash = ContentHash::of(&image.png);
        self.provenance
            .insert_if_absent(ImageRecord::new(
                output_hash.clone(),
                Provenance::Derivative,
                Some(job.id),
            ))
            .await?;
        let output_ref = self
            .artifacts
            .put(&output_key(job.id), &image.png, PNG_CONTENT_TYPE)
            .await?;
        log.record_stage("persisting", stage.elapsed().as_millis() as u64);

        log.status = JobStatus::Completed;
        log.path = Some(image.path);
        log.degraded_guarantee = image.degraded_guarantee;
        log.output_hash = Some(output_hash);
        log.processing_time_ms = started.elapsed().as_millis() as u64;
        log.completed_at = Some(Utc::now());
        let log_ref = self.write_log(log).await?;

        let mut completed = job.clone();
        completed.complete(output_ref, log_ref)?;
        self.jobs.finish(&completed).await?;
        *job = completed;

        let elapsed = started.elapsed();
        metrics::counter!(
            "face2_jobs_completed_total",
            "mode" => job.mode.to_string(),
            "path" => image.path.to_string()
        )
        .increment(1);
        metrics::histogram!("face2_job_processing_seconds").record(elapsed.as_secs_f64());
        info!(
            job_id = %job.id,
            mode = %job.mode,
            path = %image.path,
            fallback = log.fallback,
            elapsed_ms = elapsed.as_millis() as u64,
            "Job completed"
        );
        Ok(())
    }

    async fn fail_open_job(&self, job: &mut Job, log: &mut JobLog, started: Instant) {
        let reason = FailureReason::FallbackInternal;
        log.status = JobStatus::Failed;
        log.failure_reason = Some(reason);
        log.processing_time_ms = started.elapsed().as_millis() as u64;
        log.completed_at = Some(Utc::now());
        let log_ref = match self.write_log(log).await {
            Ok(locator) => Some(locator),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Could not persist job log");
                None
            }
        };

        if job.fail(reason, log_ref).is_err() {
            return;
        }
        if let Err(e) = self.jobs.finish(job).await {
            error!(job_id = %job.id, error = %e, "Could not record job failure");
        }
        metrics::counter!("face2_jobs_failed_total", "reason" => reason.to_string()).increment(1);
    }

    async fn register_derivative(&self, png: &[u8], job_id: Uuid) {
        let record = ImageRecord::new(ContentHash::of(png), Provenance::Derivative, Some(job_id));
        if let Err(e) = self.provenance.insert_if_absent(record).await {
            warn!(job_id = %job_id, error = %e, "Could not register model input composite");
        }
    }

    async fn write_log(&self, log: &JobLog) -> Result<String, OrchestratorError> {
        let json = log.to_json()?;
        let locator = self
            .artifacts
            .put(&log_key(log.job_id), &json, JSON_CONTENT_TYPE)
            .await?;
        Ok(locator)
    }
}

/// Infrastructure failures surfaced to the HTTP adapter.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Job repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Artifact storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job log encoding error: {0}")]
    Log(#[from] serde_json::Error),

    #[error(transparent)]
    State(#[from] crate::models::job::TerminalStateError),
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} has not finished")]
    NotFinished(Uuid),

    #[error("Job {0} has no stored log")]
    LogMissing(Uuid),

    #[error(transparent)]
    Internal(#[from] OrchestratorError),
}

/// Anything that fails a job after validation. Reported as `fallback-internal`.
#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error(transparent)]
    Fallback(#[from] crate::services::fallback::FallbackError),

    #[error(transparent)]
    Provenance(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    State(#[from] crate::models::job::TerminalStateError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::jobs::MemoryJobRepository;
    use crate::services::provenance::MemoryProvenanceStore;
    use crate::services::storage::MemoryArtifactStore;
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use std::time::Duration;

    struct Failing(GenerationError);

    #[async_trait]
    impl GenerationClient for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
            Err(self.0.clone())
        }
    }

    fn png(shade: u8) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(32, 32, Rgba([shade, 60, 90, 255]))).unwrap()
    }

    fn orchestrator(
        client: Arc<dyn GenerationClient>,
        artifacts: Arc<MemoryArtifactStore>,
    ) -> JobOrchestrator {
        JobOrchestrator::new(
            client,
            Arc::new(MemoryProvenanceStore::new()),
            Arc::new(MemoryJobRepository::new()),
            artifacts,
            PipelineSettings {
                allow_zero_image_synthesis: false,
                retry: RetryPolicy {
                    max_retries: 1,
                    backoff: Duration::from_millis(1),
                    timeout: Duration::from_secs(5),
                },
            },
        )
    }

    #[tokio::test]
    async fn test_rejected_job_is_failed_and_logged() {
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let orch = orchestrator(Arc::new(Failing(GenerationError::EmptyResponse)), artifacts.clone());

        let result = orch
            .submit(JobSubmission::anonymize(None, None))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.reason, Some(FailureReason::NoInput));
        assert!(result.output_image_ref.is_none());

        let stored = artifacts.get(&log_key(result.job_id)).await.unwrap().unwrap();
        let log = JobLog::from_json(&stored).unwrap();
        assert_eq!(log.failure_reason, Some(FailureReason::NoInput));
        assert!(log.generation_attempts.is_empty());
    }

    #[tokio::test]
    async fn test_feedback_requires_known_finished_job() {
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let orch = orchestrator(
            Arc::new(Failing(GenerationError::Transport("down".into()))),
            artifacts,
        );

        let missing = orch
            .add_feedback(Uuid::new_v4(), Rating::Up, String::new())
            .await
            .unwrap_err();
        assert!(matches!(missing, FeedbackError::NotFound(_)));

        let result = orch
            .submit(JobSubmission::beautify(png(10), png(20)))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Completed);

        orch.add_feedback(result.job_id, Rating::Down, "too bright".into())
            .await
            .unwrap();
        orch.add_feedback(result.job_id, Rating::Up, String::new())
            .await
            .unwrap();

        let job = orch.get_job(result.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    struct UnreachableProvenance;

    #[async_trait]
    impl ProvenanceStore for UnreachableProvenance {
        async fn get(&self, _hash: &ContentHash) -> Result<Option<ImageRecord>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn insert_if_absent(&self, record: ImageRecord) -> Result<ImageRecord, StoreError> {
            Ok(record)
        }
    }

    struct CountingClient(std::sync::atomic::AtomicU32);

    #[async_trait]
    impl GenerationClient for CountingClient {
        fn name(&self) -> &str {
            "counting"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(GenerationError::EmptyResponse)
        }
    }

    #[tokio::test]
    async fn test_unreachable_provenance_fails_closed() {
        let client = Arc::new(CountingClient(Default::default()));
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let orch = JobOrchestrator::new(
            client.clone(),
            Arc::new(UnreachableProvenance),
            Arc::new(MemoryJobRepository::new()),
            artifacts.clone(),
            PipelineSettings::default(),
        );

        let result = orch
            .submit(JobSubmission::anonymize(Some(png(7)), None))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.reason, Some(FailureReason::ProvenanceUnavailable));
        assert_eq!(client.0.load(std::sync::atomic::Ordering::SeqCst), 0);

        let job = orch.get_job(result.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.job_log_ref.is_some());
    }

    struct NoLogStore(MemoryArtifactStore);

    #[async_trait]
    impl ArtifactStore for NoLogStore {
        async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<String, StorageError> {
            if key.starts_with("logs/") {
                return Err(StorageError::Io(std::io::Error::other("bucket unavailable")));
            }
            self.0.put(key, data, content_type).await
        }

        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.0.get(key).await
        }
    }

    #[tokio::test]
    async fn test_rejection_survives_unwritable_log() {
        let orch = JobOrchestrator::new(
            Arc::new(Failing(GenerationError::EmptyResponse)),
            Arc::new(MemoryProvenanceStore::new()),
            Arc::new(MemoryJobRepository::new()),
            Arc::new(NoLogStore(MemoryArtifactStore::new())),
            PipelineSettings::default(),
        );

        let result = orch
            .submit(JobSubmission::anonymize(None, None))
            .await
            .unwrap();
        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.reason, Some(FailureReason::NoInput));
        assert!(result.job_log_ref.is_none());

        let job = orch.get_job(result.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.job_log_ref.is_none());

        let err = orch
            .add_feedback(result.job_id, Rating::Up, String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FeedbackError::LogMissing(_)));
    }

    #[tokio::test]
    async fn test_spawned_job_reports_processing_then_finishes() {
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let orch = Arc::new(orchestrator(
            Arc::new(Failing(GenerationError::Permanent("no".into()))),
            artifacts,
        ));

        let accepted = orch
            .spawn(JobSubmission::anonymize(Some(png(5)), None))
            .await
            .unwrap();
        assert_eq!(accepted.status, JobStatus::Processing);

        let mut status = JobStatus::Processing;
        for _ in 0..200 {
            status = orch.get_job(accepted.job_id).await.unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);
        assert!(orch.output_image(accepted.job_id).await.unwrap().is_some());
    }
}
