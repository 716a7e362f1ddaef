use std::time::Duration;

use serde::Deserialize;

use crate::services::generation::{GeminiConfig, RetryPolicy};
use crate::services::orchestrator::PipelineSettings;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. In-memory job and provenance stores when unset.
    pub database_url: Option<String>,

    /// Upper bound on pooled connections. Every job writes a job row and up to four image records.
    #[serde(default = "default_database_max_connections")]
    pub database_max_connections: u32,

    /// Gemini API key, shared by image and video generation
    pub gemini_api_key: String,

    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    #[serde(default = "default_gemini_api_base")]
    pub gemini_api_base: String,

    #[serde(default = "default_gemini_video_model")]
    pub gemini_video_model: String,

    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Retries of retryable generation errors before falling back
    #[serde(default = "default_generation_max_retries")]
    pub generation_max_retries: u32,

    #[serde(default = "default_generation_retry_backoff_ms")]
    pub generation_retry_backoff_ms: u64,

    /// Accept Anonymize jobs with no input image
    #[serde(default)]
    pub allow_zero_image_synthesis: bool,

    /// Root of the local artifact store, used when R2 is not configured
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,

    /// R2 bucket name
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    pub r2_secret_key: Option<String>,

    /// AES-256-GCM encryption key (base64-encoded, 32 bytes). Required with R2.
    pub encryption_key: Option<String>,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Complete R2 settings, present only when every variable is set.
#[derive(Debug, Clone, PartialEq)]
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub encryption_key: &'a str,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

fn default_gemini_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_video_model() -> String {
    "veo-2.0-generate-001".to_string()
}

fn default_generation_timeout_secs() -> u64 {
    90
}

fn default_generation_max_retries() -> u32 {
    2
}

fn default_generation_retry_backoff_ms() -> u64 {
    1200
}

fn default_artifact_dir() -> String {
    "./data".to_string()
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            allow_zero_image_synthesis: self.allow_zero_image_synthesis,
            retry: RetryPolicy {
                max_retries: self.generation_max_retries,
                backoff: Duration::from_millis(self.generation_retry_backoff_ms),
                timeout: self.generation_timeout(),
            },
        }
    }

    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
            api_base: self.gemini_api_base.clone(),
            timeout: self.generation_timeout(),
        }
    }

    /// R2 settings if the bucket is configured. A bucket without the rest is an error.
    pub fn r2(&self) -> Result<Option<R2Settings<'_>>, String> {
        let Some(bucket) = self.r2_bucket.as_deref() else {
            return Ok(None);
        };
        let missing = |name: &str| format!("R2_BUCKET is set but {name} is not");
        Ok(Some(R2Settings {
            bucket,
            endpoint: self.r2_endpoint.as_deref().ok_or_else(|| missing("R2_ENDPOINT"))?,
            access_key: self
                .r2_access_key
                .as_deref()
                .ok_or_else(|| missing("R2_ACCESS_KEY"))?,
            secret_key: self
                .r2_secret_key
                .as_deref()
                .ok_or_else(|| missing("R2_SECRET_KEY"))?,
            encryption_key: self
                .encryption_key
                .as_deref()
                .ok_or_else(|| missing("ENCRYPTION_KEY"))?,
        }))
    }
}
