use base64::Engine;
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::image::JobImages;
use crate::models::job_log::Rating;

pub const DEFAULT_VARIATION: u8 = 55;
pub const VARIATION_RANGE: (u8, u8) = (15, 100);
pub const DEFAULT_BEAUTIFY_INTENSITY: u8 = 5;
pub const BEAUTIFY_INTENSITY_RANGE: (u8, u8) = (1, 10);
pub const ALIGNMENT_VARIANCE_RANGE: (u8, u8) = (5, 20);
pub const MAX_CLOTHING_VARIATION: u8 = 15;

/// Processing mode of a job. Immutable once a job is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Photographic polish of a consented before/after pair.
    Beautify,
    /// Identity replacement preserving the treatment effect.
    Anonymize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EyeColor {
    Hazel,
    Green,
    Gray,
    Brown,
}

/// Structured toggles shared by both modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AdvancedOptions {
    #[garde(skip)]
    pub hair_micro_variation: bool,

    #[garde(skip)]
    pub clothing_type_lock: bool,

    /// Cosmetic clothing variation between panels, in percent.
    #[garde(range(max = 15))]
    pub clothing_variation: Option<u8>,

    #[garde(skip)]
    pub eye_color: Option<EyeColor>,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            hair_micro_variation: true,
            clothing_type_lock: true,
            clothing_variation: None,
            eye_color: None,
        }
    }
}

/// Normalized per-job knobs. Every numeric field is inside its documented range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    pub notes: String,
    pub variation: u8,
    pub alignment_variance: Option<u8>,
    pub beautify_intensity: u8,
    pub advanced: AdvancedOptions,
}

impl Default for JobParameters {
    fn default() -> Self {
        Self {
            notes: String::new(),
            variation: DEFAULT_VARIATION,
            alignment_variance: None,
            beautify_intensity: DEFAULT_BEAUTIFY_INTENSITY,
            advanced: AdvancedOptions::default(),
        }
    }
}

impl JobParameters {
    /// Apply defaults for missing knobs and clamp the rest into range.
    pub fn normalized(
        notes: Option<String>,
        variation: Option<u8>,
        alignment_variance: Option<u8>,
        beautify_intensity: Option<u8>,
        mut advanced: AdvancedOptions,
    ) -> Self {
        advanced.clothing_variation = advanced
            .clothing_variation
            .map(|v| v.min(MAX_CLOTHING_VARIATION));

        Self {
            notes: notes.unwrap_or_default(),
            variation: clamp(variation.unwrap_or(DEFAULT_VARIATION), VARIATION_RANGE),
            alignment_variance: alignment_variance.map(|v| clamp(v, ALIGNMENT_VARIANCE_RANGE)),
            beautify_intensity: clamp(
                beautify_intensity.unwrap_or(DEFAULT_BEAUTIFY_INTENSITY),
                BEAUTIFY_INTENSITY_RANGE,
            ),
            advanced,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_variation(mut self, variation: u8) -> Self {
        self.variation = clamp(variation, VARIATION_RANGE);
        self
    }

    pub fn with_beautify_intensity(mut self, intensity: u8) -> Self {
        self.beautify_intensity = clamp(intensity, BEAUTIFY_INTENSITY_RANGE);
        self
    }

    pub fn with_alignment_variance(mut self, variance: u8) -> Self {
        self.alignment_variance = Some(clamp(variance, ALIGNMENT_VARIANCE_RANGE));
        self
    }

    /// Notes with surrounding whitespace removed, or `None` when blank.
    pub fn effective_notes(&self) -> Option<&str> {
        let trimmed = self.notes.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

fn clamp(value: u8, (min, max): (u8, u8)) -> u8 {
    value.clamp(min, max)
}

/// A job as handed to the orchestrator by the HTTP layer (or any other caller).
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub mode: Mode,
    pub images: JobImages,
    pub parameters: JobParameters,
    /// Consent as verified by the caller. Only meaningful for Beautify.
    pub consent_confirmed: bool,
}

impl JobSubmission {
    pub fn beautify(before: Vec<u8>, after: Vec<u8>) -> Self {
        Self {
            mode: Mode::Beautify,
            images: JobImages::both(before, after),
            parameters: JobParameters::default(),
            consent_confirmed: true,
        }
    }

    pub fn anonymize(before: Option<Vec<u8>>, after: Option<Vec<u8>>) -> Self {
        Self {
            mode: Mode::Anonymize,
            images: JobImages::new(before, after),
            parameters: JobParameters::default(),
            consent_confirmed: false,
        }
    }

    pub fn with_parameters(mut self, parameters: JobParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_consent(mut self, consent_confirmed: bool) -> Self {
        self.consent_confirmed = consent_confirmed;
        self
    }
}

/// Base64 image payloads, optionally prefixed with a `data:image/...;base64,` header.
#[derive(Debug, Default, Deserialize)]
pub struct ImagePayloads {
    pub before: Option<String>,
    pub after: Option<String>,
}

impl ImagePayloads {
    pub fn decode(&self) -> Result<JobImages, base64::DecodeError> {
        let before = self.before.as_deref().map(decode_image_payload).transpose()?;
        let after = self.after.as_deref().map(decode_image_payload).transpose()?;
        Ok(JobImages::new(before, after))
    }
}

/// Decode a base64 image, stripping a data-URL prefix if present.
pub fn decode_image_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let data = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    base64::engine::general_purpose::STANDARD.decode(data.trim())
}

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize, Validate)]
pub struct JobRequest {
    #[garde(skip)]
    pub mode: Mode,

    #[garde(skip)]
    #[serde(default)]
    pub images: ImagePayloads,

    #[garde(length(max = 4000))]
    pub notes: Option<String>,

    #[garde(range(min = 15, max = 100))]
    pub variation: Option<u8>,

    #[garde(range(min = 1, max = 10))]
    pub beautify_intensity: Option<u8>,

    #[garde(range(min = 5, max = 20))]
    pub alignment_variance: Option<u8>,

    #[garde(dive)]
    #[serde(default)]
    pub advanced: AdvancedOptions,

    #[garde(skip)]
    #[serde(default)]
    pub consent_verified: bool,
}

impl JobRequest {
    pub fn into_submission(self) -> Result<JobSubmission, base64::DecodeError> {
        let images = self.images.decode()?;
        Ok(JobSubmission {
            mode: self.mode,
            images,
            parameters: JobParameters::normalized(
                self.notes,
                self.variation,
                self.alignment_variance,
                self.beautify_intensity,
                self.advanced,
            ),
            consent_confirmed: self.consent_verified,
        })
    }
}

/// Body of `POST /api/v1/jobs/{id}/feedback`.
#[derive(Debug, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[garde(skip)]
    pub rating: Rating,

    #[garde(length(max = 2000))]
    pub comment: Option<String>,
}
