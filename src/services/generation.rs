use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::job_log::GenerationAttempt;

/// Inputs smaller than this are not worth a model call.
pub const MIN_INPUT_BYTES: usize = 200;

/// Upper bound on a server-requested retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// One call to the image-generation model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// AI-input composite, a single raw image, or nothing for zero-image synthesis.
    pub image: Option<Vec<u8>>,
    pub policy_text: &'static str,
    pub directive: String,
}

/// The external image-generation model.
///
/// Implementations must not persist anything; the orchestrator owns provenance.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Model identifier recorded in the job log.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, GenerationError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Model response carried no image payload")]
    EmptyResponse,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Rate limited by the model provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Model rejected the request: {0}")]
    Permanent(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Transport(_) | GenerationError::RateLimited { .. }
        )
    }

    /// Stable tag recorded in job logs and metrics.
    pub fn tag(&self) -> &'static str {
        match self {
            GenerationError::EmptyResponse => "empty-response",
            GenerationError::Transport(_) => "transport",
            GenerationError::RateLimited { .. } => "rate-limited",
            GenerationError::Permanent(_) => "permanent",
        }
    }
}

/// Retry schedule for retryable generation errors: linear backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    /// Per-attempt deadline, applied on top of any client-side timeout.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn delay_before(&self, retry: u32, error: &GenerationError) -> Duration {
        let linear = self.backoff * retry;
        match error {
            GenerationError::RateLimited {
                retry_after: Some(after),
            } => (*after).max(linear).min(MAX_RETRY_DELAY),
            _ => linear,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(1200),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Result of [`generate_with_retry`]: the final outcome and every attempt made.
#[derive(Debug)]
pub struct GenerationOutcome {
    pub result: Result<Vec<u8>, GenerationError>,
    pub attempts: Vec<GenerationAttempt>,
}

/// Call `client` until it succeeds, fails permanently, or retries run out.
pub async fn generate_with_retry(
    client: &dyn GenerationClient,
    request: &GenerationRequest,
    policy: &RetryPolicy,
) -> GenerationOutcome {
    let mut attempts = Vec::new();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let started = Instant::now();
        let result = match tokio::time::timeout(policy.timeout, client.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Transport(format!(
                "no response within {}s",
                policy.timeout.as_secs()
            ))),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.tag(),
        };
        metrics::counter!("face2_generation_attempts_total", "outcome" => outcome).increment(1);
        attempts.push(GenerationAttempt {
            attempt,
            outcome: outcome.to_string(),
            elapsed_ms,
        });

        match result {
            Err(error) if error.is_retryable() && attempt <= policy.max_retries => {
                let delay = policy.delay_before(attempt, &error);
                warn!(
                    model = client.name(),
                    attempt,
                    error = error.tag(),
                    delay_ms = delay.as_millis() as u64,
                    "Generation attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            result => return GenerationOutcome { result, attempts },
        }
    }
}

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

/// Gemini `generateContent` with image output.
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Image {
        inline_data: InlineData,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 2],
}

#[derive(Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    inline_data: Option<InlineData>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Permanent(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<u8>, GenerationError> {
        let mut parts = vec![RequestPart::Text {
            text: &request.directive,
        }];
        if let Some(image) = &request.image {
            if image.len() < MIN_INPUT_BYTES {
                return Err(GenerationError::Permanent(format!(
                    "input of {} bytes is too small for the model",
                    image.len()
                )));
            }
            parts.push(RequestPart::Image {
                inline_data: InlineData {
                    mime_type: mime_type_of(image).to_string(),
                    data: base64::engine::general_purpose::STANDARD.encode(image),
                },
            });
        }

        let body = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![RequestPart::Text {
                    text: request.policy_text,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts,
            }],
            generation_config: GenerationConfig {
                response_modalities: ["IMAGE", "TEXT"],
            },
        };

        debug!(model = %self.config.model, has_image = request.image.is_some(), "Calling Gemini");
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, retry_after, &text));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Transport(e.without_url().to_string()))?;
        extract_image(&bytes)
    }
}

fn mime_type_of(image: &[u8]) -> &'static str {
    match image::guess_format(image) {
        Ok(image::ImageFormat::Jpeg) => "image/jpeg",
        Ok(image::ImageFormat::WebP) => "image/webp",
        _ => "image/png",
    }
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success HTTP response onto the generation error taxonomy.
fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str) -> GenerationError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        return GenerationError::RateLimited { retry_after };
    }
    if status.is_server_error() {
        return GenerationError::Transport(format!("HTTP {status}"));
    }
    GenerationError::Permanent(format!("HTTP {status}"))
}

/// First inline image of the first candidate.
fn extract_image(body: &[u8]) -> Result<Vec<u8>, GenerationError> {
    let parsed: GenerateContentResponse = serde_json::from_slice(body)
        .map_err(|e| GenerationError::Permanent(format!("malformed model response: {e}")))?;

    let data = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().find_map(|p| p.inline_data))
        .map(|inline| inline.data)
        .filter(|data| !data.is_empty())
        .ok_or(GenerationError::EmptyResponse)?;

    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|_| GenerationError::EmptyResponse)
}
