use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::image::ContentHash;
use crate::models::job::{FailureReason, JobStatus};
use crate::models::request::{AdvancedOptions, JobParameters, Mode};

/// Which path produced the output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GenerationPath {
    Ai,
    Fallback,
    /// Fallback with no usable input: a neutral placeholder canvas.
    Placeholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Rating {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub job_id: Uuid,
    pub rating: Rating,
    #[serde(default)]
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// Parameters as used by the job, with notes reduced to a presence flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedParameters {
    pub variation: Option<u8>,
    pub beautify_intensity: Option<u8>,
    /// `"auto"` unless the caller overrode it.
    pub alignment_variance: String,
    pub notes_present: bool,
    pub advanced: AdvancedOptions,
}

impl LoggedParameters {
    pub fn from_parameters(mode: Mode, params: &JobParameters) -> Self {
        let (variation, beautify_intensity) = match mode {
            Mode::Anonymize => (Some(params.variation), None),
            Mode::Beautify => (None, Some(params.beautify_intensity)),
        };
        Self {
            variation,
            beautify_intensity,
            alignment_variance: params
                .alignment_variance
                .map(|v| format!("{v}%"))
                .unwrap_or_else(|| "auto".to_string()),
            notes_present: params.effective_notes().is_some(),
            advanced: params.advanced.clone(),
        }
    }
}

/// One call to the generation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub attempt: u32,
    /// `"ok"` or a generation error tag.
    pub outcome: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub elapsed_ms: u64,
}

/// Server-only structured record of a job. Never shown to end users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLog {
    pub job_id: Uuid,
    pub mode: Mode,
    pub status: JobStatus,
    pub policy_version: String,
    pub ai_service: String,
    pub path: Option<GenerationPath>,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    /// Set when the output does not carry the mode's privacy guarantee.
    pub degraded_guarantee: bool,
    pub parameters: LoggedParameters,
    pub input_hashes: Vec<ContentHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<ContentHash>,
    /// Similarity guard retries are delegated to the model; this is the bound it was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_guard_max_attempts: Option<u32>,
    pub generation_attempts: Vec<GenerationAttempt>,
    pub stages: Vec<StageTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub feedback: Vec<Feedback>,
}

impl JobLog {
    pub fn new(job_id: Uuid, mode: Mode, params: &JobParameters, policy_version: &str) -> Self {
        Self {
            job_id,
            mode,
            status: JobStatus::Processing,
            policy_version: policy_version.to_string(),
            ai_service: String::new(),
            path: None,
            fallback: false,
            fallback_reason: None,
            degraded_guarantee: false,
            parameters: LoggedParameters::from_parameters(mode, params),
            input_hashes: Vec::new(),
            output_hash: None,
            similarity_guard_max_attempts: None,
            generation_attempts: Vec::new(),
            stages: Vec::new(),
            failure_reason: None,
            processing_time_ms: 0,
            created_at: Utc::now(),
            completed_at: None,
            feedback: Vec::new(),
        }
    }

    pub fn record_stage(&mut self, stage: impl Into<String>, elapsed_ms: u64) {
        self.stages.push(StageTiming {
            stage: stage.into(),
            elapsed_ms,
        });
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
