use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::image::ContentHash;
use crate::models::request::{JobParameters, Mode};

/// Status of a processing job. Terminal states are final.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Stable, enumerable reason reported for a failed job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FailureReason {
    MissingImage,
    NoInput,
    DerivativeReuse,
    ConsentMissing,
    UnsupportedImage,
    /// The provenance store could not be read, so statelessness is unverified.
    ProvenanceUnavailable,
    FallbackInternal,
}

/// A single processing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub mode: Mode,
    pub before_hash: Option<ContentHash>,
    pub after_hash: Option<ContentHash>,
    pub parameters: JobParameters,
    pub status: JobStatus,
    pub failure_reason: Option<FailureReason>,
    pub output_ref: Option<String>,
    pub job_log_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("job {job_id} is already {status} and cannot change")]
pub struct TerminalStateError {
    pub job_id: Uuid,
    pub status: JobStatus,
}

impl Job {
    pub fn new(mode: Mode, parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            before_hash: None,
            after_hash: None,
            parameters,
            status: JobStatus::Processing,
            failure_reason: None,
            output_ref: None,
            job_log_ref: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn ensure_open(&self) -> Result<(), TerminalStateError> {
        if self.status.is_terminal() {
            return Err(TerminalStateError {
                job_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    pub fn complete(
        &mut self,
        output_ref: String,
        job_log_ref: String,
    ) -> Result<(), TerminalStateError> {
        self.ensure_open()?;
        self.status = JobStatus::Completed;
        self.output_ref = Some(output_ref);
        self.job_log_ref = Some(job_log_ref);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(
        &mut self,
        reason: FailureReason,
        job_log_ref: Option<String>,
    ) -> Result<(), TerminalStateError> {
        self.ensure_open()?;
        self.status = JobStatus::Failed;
        self.failure_reason = Some(reason);
        self.job_log_ref = job_log_ref;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// What the pipeline reports back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobResult {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_log_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl From<&Job> for JobResult {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            output_image_ref: job.output_ref.clone(),
            job_log_ref: job.job_log_ref.clone(),
            reason: job.failure_reason,
        }
    }
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            mode: job.mode,
            created_at: job.created_at,
            completed_at: job.completed_at,
            output_image_ref: job.output_ref.clone(),
            reason: job.failure_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = Job::new(Mode::Anonymize, JobParameters::default());
        job.complete("outputs/a.png".into(), "logs/a.json".into()).unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let err = job.fail(FailureReason::FallbackInternal, None).unwrap_err();
        assert_eq!(err.status, JobStatus::Completed);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.failure_reason.is_none());
    }

    #[test]
    fn test_failure_reason_tags_are_kebab_case() {
        assert_eq!(FailureReason::DerivativeReuse.to_string(), "derivative-reuse");
        assert_eq!(
            serde_json::to_value(FailureReason::MissingImage).unwrap(),
            serde_json::json!("missing-image")
        );
        assert_eq!(
            "fallback-internal".parse::<FailureReason>().unwrap(),
            FailureReason::FallbackInternal
        );
    }
}
