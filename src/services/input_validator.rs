use std::io::Cursor;

use image::{ImageFormat, ImageReader, Limits};
use tracing::debug;

use crate::models::image::{ContentHash, ImageSlot};
use crate::models::job::FailureReason;
use crate::models::request::{JobSubmission, Mode};
use crate::services::provenance::{ProvenanceStore, StoreError};

/// Formats accepted as job inputs.
const ACCEPTED_FORMATS: [ImageFormat; 3] = [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Largest accepted edge, in pixels.
pub const MAX_INPUT_DIMENSION: u32 = 12_000;

/// Decoder allocation ceiling for a single input.
const MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

/// Inputs that passed validation, hashed, in panel order (before first).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInputs {
    pub hashes: Vec<(ImageSlot, ContentHash)>,
}

impl ValidatedInputs {
    pub fn hash_of(&self, slot: ImageSlot) -> Option<&ContentHash> {
        self.hashes.iter().find(|(s, _)| *s == slot).map(|(_, h)| h)
    }
}

/// Per-mode input cardinality, consent gating and statelessness.
///
/// Checks run in this order: derivative reuse, cardinality, decodability, consent.
/// Every accepted image decodes in full, so later stages never see unreadable input.
#[derive(Debug, Clone, Copy)]
pub struct InputValidator {
    allow_zero_image_synthesis: bool,
}

impl InputValidator {
    pub fn new(allow_zero_image_synthesis: bool) -> Self {
        Self {
            allow_zero_image_synthesis,
        }
    }

    pub async fn validate(
        &self,
        submission: &JobSubmission,
        provenance: &dyn ProvenanceStore,
    ) -> Result<ValidatedInputs, ValidationError> {
        let mut hashes = Vec::new();

        for (slot, bytes) in submission.images.present() {
            let hash = ContentHash::of(bytes);
            if let Some(record) = provenance.get(&hash).await? {
                if record.is_derivative() {
                    debug!(slot = %slot, hash = %hash, "Rejecting previously generated image");
                    return Err(ValidationError::DerivativeReuse { slot });
                }
            }
            hashes.push((slot, hash));
        }

        self.check_cardinality(submission)?;

        for (slot, bytes) in submission.images.present() {
            check_decodable(slot, bytes)?;
        }

        if submission.mode == Mode::Beautify && !submission.consent_confirmed {
            return Err(ValidationError::ConsentMissing);
        }

        Ok(ValidatedInputs { hashes })
    }

    fn check_cardinality(&self, submission: &JobSubmission) -> Result<(), ValidationError> {
        let supplied = |slot| submission.images.get(slot).is_some_and(|b: &[u8]| !b.is_empty());
        let (before, after) = (supplied(ImageSlot::Before), supplied(ImageSlot::After));
        match submission.mode {
            Mode::Beautify if !before => Err(ValidationError::MissingImage {
                slot: ImageSlot::Before,
            }),
            Mode::Beautify if !after => Err(ValidationError::MissingImage {
                slot: ImageSlot::After,
            }),
            Mode::Anonymize if !before && !after && !self.allow_zero_image_synthesis => {
                Err(ValidationError::NoInput)
            }
            _ => Ok(()),
        }
    }
}

fn decode_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_INPUT_DIMENSION);
    limits.max_image_height = Some(MAX_INPUT_DIMENSION);
    limits.max_alloc = Some(MAX_DECODE_ALLOC);
    limits
}

/// Fully decode `bytes`; header sniffing alone lets truncated bodies through.
fn check_decodable(slot: ImageSlot, bytes: &[u8]) -> Result<(), ValidationError> {
    let mut reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|_| ValidationError::UnsupportedImage { slot })?;

    match reader.format() {
        Some(format) if ACCEPTED_FORMATS.contains(&format) => {}
        _ => return Err(ValidationError::UnsupportedImage { slot }),
    }

    reader.limits(decode_limits());
    match reader.decode() {
        Ok(image) if image.width() > 0 && image.height() > 0 => Ok(()),
        Ok(_) => Err(ValidationError::UnsupportedImage { slot }),
        Err(e) => {
            debug!(slot = %slot, error = %e, "Input image failed to decode");
            Err(ValidationError::UnsupportedImage { slot })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required {slot} image")]
    MissingImage { slot: ImageSlot },

    #[error("No input image supplied and zero-image synthesis is disabled")]
    NoInput,

    #[error("The {slot} image was produced by this service and cannot be reused")]
    DerivativeReuse { slot: ImageSlot },

    #[error("Beautify requires confirmed consent")]
    ConsentMissing,

    #[error("The {slot} image is not a readable JPEG, PNG or WebP")]
    UnsupportedImage { slot: ImageSlot },

    #[error("Provenance store unavailable: {0}")]
    Provenance(#[from] StoreError),
}

impl ValidationError {
    pub fn reason(&self) -> FailureReason {
        match self {
            ValidationError::MissingImage { .. } => FailureReason::MissingImage,
            ValidationError::NoInput => FailureReason::NoInput,
            ValidationError::DerivativeReuse { .. } => FailureReason::DerivativeReuse,
            ValidationError::ConsentMissing => FailureReason::ConsentMissing,
            ValidationError::UnsupportedImage { .. } => FailureReason::UnsupportedImage,
            ValidationError::Provenance(_) => FailureReason::ProvenanceUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::image::{ImageRecord, Provenance};
    use crate::services::composite::encode_png;
    use crate::services::provenance::MemoryProvenanceStore;
    use image::{Rgba, RgbaImage};

    fn png(shade: u8) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(8, 8, Rgba([shade, shade, shade, 255]))).unwrap()
    }

    #[tokio::test]
    async fn test_beautify_requires_both_images() {
        let store = MemoryProvenanceStore::new();
        let validator = InputValidator::new(true);

        let mut submission = JobSubmission::beautify(png(1), png(2));
        submission.images.after = None;
        let err = validator.validate(&submission, &store).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::MissingImage);

        submission.images.after = Some(png(2));
        submission.images.before = None;
        let err = validator.validate(&submission, &store).await.unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingImage {
                slot: ImageSlot::Before
            }
        ));
    }

    #[tokio::test]
    async fn test_beautify_requires_consent() {
        let store = MemoryProvenanceStore::new();
        let submission = JobSubmission::beautify(png(1), png(2)).with_consent(false);
        let err = InputValidator::new(false)
            .validate(&submission, &store)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), FailureReason::ConsentMissing);
    }

    #[tokio::test]
    async fn test_anonymize_zero_images_depends_on_deployment() {
        let store = MemoryProvenanceStore::new();
        let submission = JobSubmission::anonymize(None, None);

        let err = InputValidator::new(false)
            .validate(&submission, &store)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), FailureReason::NoInput);

        let accepted = InputValidator::new(true)
            .validate(&submission, &store)
            .await
            .unwrap();
        assert!(accepted.hashes.is_empty());
    }

    #[tokio::test]
    async fn test_anonymize_single_image_is_accepted() {
        let store = MemoryProvenanceStore::new();
        let image = png(9);
        let submission = JobSubmission::anonymize(None, Some(image.clone()));

        let accepted = InputValidator::new(false)
            .validate(&submission, &store)
            .await
            .unwrap();
        assert_eq!(accepted.hashes.len(), 1);
        assert_eq!(accepted.hash_of(ImageSlot::After), Some(&ContentHash::of(&image)));
        assert_eq!(accepted.hash_of(ImageSlot::Before), None);
    }

    #[tokio::test]
    async fn test_derivative_is_rejected_in_every_mode() {
        let store = MemoryProvenanceStore::new();
        let output = png(50);
        store
            .insert_if_absent(ImageRecord::new(
                ContentHash::of(&output),
                Provenance::Derivative,
                None,
            ))
            .await
            .unwrap();
        let validator = InputValidator::new(true);

        let beautify = JobSubmission::beautify(png(1), output.clone());
        let err = validator.validate(&beautify, &store).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::DerivativeReuse);

        // Checked ahead of cardinality and consent.
        let beautify_missing = JobSubmission::beautify(output.clone(), Vec::new()).with_consent(false);
        let err = validator.validate(&beautify_missing, &store).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::DerivativeReuse);

        let anonymize = JobSubmission::anonymize(Some(output), None);
        let err = validator.validate(&anonymize, &store).await.unwrap_err();
        assert_eq!(err.reason(), FailureReason::DerivativeReuse);
    }

    #[tokio::test]
    async fn test_original_records_do_not_block_reuse() {
        let store = MemoryProvenanceStore::new();
        let photo = png(3);
        store
            .insert_if_absent(ImageRecord::new(ContentHash::of(&photo), Provenance::Original, None))
            .await
            .unwrap();

        let submission = JobSubmission::anonymize(Some(photo), None);
        assert!(InputValidator::new(false)
            .validate(&submission, &store)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_truncated_image_is_rejected() {
        let store = MemoryProvenanceStore::new();
        let mut photo = RgbaImage::new(64, 64);
        for (x, y, pixel) in photo.enumerate_pixels_mut() {
            *pixel = Rgba([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 3) as u8, 255]);
        }
        let full = encode_png(&photo).unwrap();
        let truncated = full[..full.len() / 2].to_vec();

        let submission = JobSubmission::anonymize(Some(truncated), None);
        let err = InputValidator::new(false)
            .validate(&submission, &store)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnsupportedImage {
                slot: ImageSlot::Before
            }
        ));
    }

    #[tokio::test]
    async fn test_oversized_image_is_rejected() {
        let store = MemoryProvenanceStore::new();
        let wide = encode_png(&RgbaImage::from_pixel(
            MAX_INPUT_DIMENSION + 1,
            1,
            Rgba([10, 20, 30, 255]),
        ))
        .unwrap();

        let submission = JobSubmission::anonymize(None, Some(wide));
        let err = InputValidator::new(false)
            .validate(&submission, &store)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), FailureReason::UnsupportedImage);
    }

    #[tokio::test]
    async fn test_missing_image_reported_before_unreadable_one() {
        let store = MemoryProvenanceStore::new();
        let validator = InputValidator::new(false);

        let mut submission = JobSubmission::beautify(b"not an image at all".to_vec(), png(2));
        submission.images.after = None;
        let err = validator.validate(&submission, &store).await.unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MissingImage {
                slot: ImageSlot::After
            }
        ));

        // With both panels present the unreadable one is named.
        submission.images.after = Some(png(2));
        let err = validator.validate(&submission, &store).await.unwrap_err();
        assert!(matches!(
            err,
            ValidationError::UnsupportedImage {
                slot: ImageSlot::Before
            }
        ));
    }

    #[tokio::test]
    async fn test_unreadable_bytes_are_rejected() {
        let store = MemoryProvenanceStore::new();
        let submission = JobSubmission::anonymize(Some(b"definitely not a photo".to_vec()), None);
        let err = InputValidator::new(false)
            .validate(&submission, &store)
            .await
            .unwrap_err();
        assert_eq!(err.reason(), FailureReason::UnsupportedImage);
    }
}
