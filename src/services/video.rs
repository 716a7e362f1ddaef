//! Clinical demo videos from a finished composite.
//!
//! A single long-running model call: submit, then poll until done. Polling
//! backs off on rate limits and resets after every successful poll.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};

const PANEL_CONFINEMENT: &str = "CRITICAL INSTRUCTION: All generated motion and content MUST be strictly confined within the original boundaries of the before-and-after photo panels. Do NOT alter, fill, or generate anything in the background or areas outside of the two subject panels. The framing of the original photos must be perfectly preserved throughout the video.

Generate a clinical demonstration video using the provided composite photo. The two panels must retain their exact original photos, backgrounds, and treatment results. Do not apply transitions, cuts, filters, or effects. Only add subtle, consistent human-like motion as described below, contained entirely within each panel:";

const STEADY_BEFORE: &str = "- Left Panel (Before): The subject remains steady and forward-facing within its frame with a neutral expression. Add only very subtle micro-movements (natural blinking).";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrimaryAnimation {
    AnimateBeforeHeadTurn,
    AnimateAfterHeadTurn,
    AnimateAfterSmile,
    AnimateAfterSurprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmphasisEffect {
    #[default]
    None,
    HandGesture,
    SubtleZoom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MotionSpeed {
    Slow,
    #[default]
    Normal,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoOptions {
    pub primary_animation: PrimaryAnimation,
    #[serde(default)]
    pub emphasis_effect: EmphasisEffect,
    #[serde(default)]
    pub motion_speed: MotionSpeed,
}

impl PrimaryAnimation {
    fn panel_instructions(self) -> (&'static str, &'static str) {
        match self {
            PrimaryAnimation::AnimateBeforeHeadTurn => (
                "- Left Panel (Before): The subject's head rotates slowly side-to-side within its frame. The movement must feel intentional, as if presenting untreated skin for close inspection. Maintain all natural texture and imperfections exactly as in the source photo.",
                "- Right Panel (After): The subject remains steady and forward-facing within its frame. Add only very subtle micro-movements (natural blinking, faint micro-expressions) to keep the photo alive. The overall impression must be calm stability.",
            ),
            PrimaryAnimation::AnimateAfterHeadTurn => (
                "- Left Panel (Before): The subject remains steady and forward-facing within its frame. Add only very subtle micro-movements (natural blinking) to keep the photo alive.",
                "- Right Panel (After): The subject's head rotates slowly side-to-side within its frame. The movement must feel confident, as if showing off the results from all angles.",
            ),
            PrimaryAnimation::AnimateAfterSmile => (
                STEADY_BEFORE,
                "- Right Panel (After): The subject's expression transitions from neutral into a gentle, confident smile. The smile forms naturally over 2-3 seconds and then holds. The head itself remains completely still.",
            ),
            PrimaryAnimation::AnimateAfterSurprise => (
                STEADY_BEFORE,
                "- Right Panel (After): The subject's expression transitions into one of pleased surprise: a slight widening of the eyes and a soft, happy mouth, as if seeing the results for the first time. The head remains completely still.",
            ),
        }
    }
}

impl EmphasisEffect {
    fn instruction(self) -> &'static str {
        match self {
            EmphasisEffect::None => "",
            EmphasisEffect::HandGesture => " For 2-3 seconds, a natural, professional-looking hand (neutral nail color, no jewelry) enters the RIGHT PANEL ONLY to gently highlight the primary treatment area, then smoothly exits the frame. The hand must never appear in the left panel or obscure the results.",
            EmphasisEffect::SubtleZoom => " Apply a very slow, subtle zoom-in (from 100% to 105% scale) focused on the subject in this panel, lasting most of the video.",
        }
    }
}

impl MotionSpeed {
    fn instruction(self) -> &'static str {
        match self {
            MotionSpeed::Slow => " All described movements are performed slowly and deliberately.",
            MotionSpeed::Normal => " All described movements are performed at a natural, calm pace.",
            MotionSpeed::Fast => " All described movements are performed at a slightly quicker, efficient pace.",
        }
    }
}

/// Assemble the video prompt. Emphasis effects only ever apply to the after panel.
pub fn build_video_prompt(options: &VideoOptions) -> String {
    let (before, after) = options.primary_animation.panel_instructions();
    format!(
        "{PANEL_CONFINEMENT}\n\n{before}\n\n{after}{}\n\n- Overall Pacing:{}",
        options.emphasis_effect.instruction(),
        options.motion_speed.instruction()
    )
}

/// Poll delay that doubles on rate limits up to a ceiling and resets on success.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl PollBackoff {
    pub const DEFAULT_INITIAL: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(60);

    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn on_rate_limit(&mut self) -> Duration {
        self.current = (self.current * 2).min(self.max);
        self.current
    }

    pub fn on_success(&mut self) {
        self.current = self.initial;
    }
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL, Self::DEFAULT_MAX)
    }
}

/// State of a long-running video operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationState {
    Pending,
    Done { video_uri: Option<String> },
}

/// Transport to the video model.
#[async_trait]
pub trait VideoBackend: Send + Sync {
    /// Start an operation and return its name.
    async fn start(&self, prompt: &str, image_png: &[u8]) -> Result<String, VideoError>;

    async fn poll(&self, operation: &str) -> Result<OperationState, VideoError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedVideo {
    pub operation: String,
    pub video_uri: String,
    pub elapsed_ms: u64,
}

pub struct VideoClient {
    backend: Arc<dyn VideoBackend>,
    backoff: PollBackoff,
    max_wait: Duration,
}

impl VideoClient {
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(15 * 60);

    pub fn new(backend: Arc<dyn VideoBackend>) -> Self {
        Self {
            backend,
            backoff: PollBackoff::default(),
            max_wait: Self::DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub async fn generate(
        &self,
        composite_png: &[u8],
        options: &VideoOptions,
    ) -> Result<GeneratedVideo, VideoError> {
        let started = Instant::now();
        let prompt = build_video_prompt(options);
        let operation = self.backend.start(&prompt, composite_png).await?;
        info!(operation = %operation, animation = %options.primary_animation, "Video generation started");

        let mut backoff = self.backoff;
        loop {
            if started.elapsed() >= self.max_wait {
                return Err(VideoError::TimedOut(self.max_wait.as_secs()));
            }
            tokio::time::sleep(backoff.current()).await;

            match self.backend.poll(&operation).await {
                Ok(OperationState::Pending) => {
                    backoff.on_success();
                    debug!(operation = %operation, "Video still rendering");
                }
                Ok(OperationState::Done { video_uri }) => {
                    let video_uri = video_uri.ok_or(VideoError::NoVideo)?;
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    info!(operation = %operation, elapsed_ms, "Video generation finished");
                    return Ok(GeneratedVideo {
                        operation,
                        video_uri,
                        elapsed_ms,
                    });
                }
                Err(VideoError::RateLimited) => {
                    let previous = backoff.current();
                    let next = backoff.on_rate_limit();
                    warn!(
                        operation = %operation,
                        previous_ms = previous.as_millis() as u64,
                        next_ms = next.as_millis() as u64,
                        "Rate limited while polling, backing off"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Veo over the Gemini REST API.
pub struct VeoBackend {
    http: Client,
    api_key: String,
    api_base: String,
    model: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest<'a> {
    instances: [Instance<'a>; 1],
    parameters: PredictParameters,
}

#[derive(Serialize)]
struct Instance<'a> {
    prompt: &'a str,
    image: InstanceImage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceImage {
    bytes_base64_encoded: String,
    mime_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictParameters {
    sample_count: u32,
}

#[derive(Deserialize)]
struct Operation {
    name: Option<String>,
    #[serde(default)]
    done: bool,
    response: Option<OperationResponse>,
    error: Option<OperationError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateVideoResponse {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

#[derive(Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

impl VeoBackend {
    /// `timeout` bounds each HTTP call, not the whole operation.
    pub fn new(
        api_key: String,
        api_base: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, VideoError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VideoError::Request(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            http,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Operation, VideoError> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| VideoError::Request(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VideoError::Request(e.without_url().to_string()))?;
        if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
            return Err(VideoError::RateLimited);
        }
        if !status.is_success() {
            return Err(VideoError::Request(format!("HTTP {status}")));
        }
        parse_operation(&body)
    }
}

fn parse_operation(body: &str) -> Result<Operation, VideoError> {
    serde_json::from_str(body).map_err(|e| VideoError::Request(format!("malformed operation: {e}")))
}

fn operation_state(operation: Operation) -> Result<OperationState, VideoError> {
    if let Some(error) = operation.error {
        return Err(VideoError::Failed(error.message));
    }
    if !operation.done {
        return Ok(OperationState::Pending);
    }
    let video_uri = operation
        .response
        .and_then(|r| r.generate_video_response)
        .and_then(|r| r.generated_samples.into_iter().next())
        .and_then(|s| s.video)
        .and_then(|v| v.uri);
    Ok(OperationState::Done { video_uri })
}

#[async_trait]
impl VideoBackend for VeoBackend {
    async fn start(&self, prompt: &str, image_png: &[u8]) -> Result<String, VideoError> {
        let body = PredictRequest {
            instances: [Instance {
                prompt,
                image: InstanceImage {
                    bytes_base64_encoded: base64::engine::general_purpose::STANDARD.encode(image_png),
                    mime_type: "image/png",
                },
            }],
            parameters: PredictParameters { sample_count: 1 },
        };
        let url = format!("{}/models/{}:predictLongRunning", self.api_base, self.model);
        let operation = self.send(self.http.post(url).json(&body)).await?;
        operation
            .name
            .ok_or_else(|| VideoError::Request("operation without a name".to_string()))
    }

    async fn poll(&self, operation: &str) -> Result<OperationState, VideoError> {
        let url = format!("{}/{}", self.api_base, operation);
        operation_state(self.send(self.http.get(url)).await?)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VideoError {
    #[error("Rate limited by the video model")]
    RateLimited,

    #[error("Video request failed: {0}")]
    Request(String),

    #[error("Video generation failed: {0}")]
    Failed(String),

    #[error("Video generation finished without a downloadable video")]
    NoVideo,

    #[error("Video generation did not finish within {0}s")]
    TimedOut(u64),
}
