//! Deterministic local output when the generation model is unavailable.
//!
//! Nothing here alters identity. Anonymize results from this path carry no
//! privacy guarantee and are flagged as degraded.

use image::{DynamicImage, Rgba, RgbaImage};
use tracing::debug;

use crate::models::image::JobImages;
use crate::models::job_log::GenerationPath;
use crate::models::request::{JobParameters, Mode, BEAUTIFY_INTENSITY_RANGE};
use crate::services::composite::{decode_image, encode_png, CanvasSpec, CompositeBuilder, CompositeError};

/// Panel-difference transform for single-image Anonymize.
const ANONYMIZE_BRIGHTNESS: f32 = 1.1;
const ANONYMIZE_SATURATION: f32 = 0.9;
const ANONYMIZE_HUE_DEGREES: i32 = 10;

/// Output of the fallback path, already encoded as PNG.
#[derive(Debug, Clone)]
pub struct FallbackOutput {
    pub png: Vec<u8>,
    pub path: GenerationPath,
    /// The output does not satisfy the mode's privacy guarantee.
    pub degraded_guarantee: bool,
}

pub struct FallbackEngine {
    composite: CompositeBuilder,
}

impl Default for FallbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackEngine {
    pub fn new() -> Self {
        Self {
            composite: CompositeBuilder::output(),
        }
    }

    /// Produce the output composite for inputs that already passed validation.
    pub fn produce(
        &self,
        mode: Mode,
        params: &JobParameters,
        images: &JobImages,
    ) -> Result<FallbackOutput, FallbackError> {
        match mode {
            Mode::Beautify => self.beautify(params.beautify_intensity, images),
            Mode::Anonymize => self.anonymize(images),
        }
    }

    fn beautify(&self, intensity: u8, images: &JobImages) -> Result<FallbackOutput, FallbackError> {
        let (Some(before), Some(after)) = (&images.before, &images.after) else {
            return Err(FallbackError::MissingInput);
        };
        let adjustment = PolishAdjustment::for_intensity(intensity);
        debug!(?adjustment, "Applying Beautify fallback");

        let before = adjustment.apply(&decode_image(before)?);
        let after = adjustment.apply(&decode_image(after)?);
        Ok(FallbackOutput {
            png: encode_png(&self.composite.compose(&before, &after))?,
            path: GenerationPath::Fallback,
            degraded_guarantee: false,
        })
    }

    fn anonymize(&self, images: &JobImages) -> Result<FallbackOutput, FallbackError> {
        let present = images.present();
        let canvas = match present.as_slice() {
            [] => {
                debug!("No usable input, producing placeholder");
                let placeholder = self.composite.placeholder(CanvasSpec::PLACEHOLDER_FILL);
                return Ok(FallbackOutput {
                    png: encode_png(&placeholder)?,
                    path: GenerationPath::Placeholder,
                    degraded_guarantee: true,
                });
            }
            [(_, only)] => {
                let source = decode_image(only)?;
                let shifted = shift_appearance(&source);
                self.composite.compose(&source, &shifted)
            }
            [(_, before), (_, after), ..] => {
                self.composite
                    .compose(&decode_image(before)?, &decode_image(after)?)
            }
        };

        Ok(FallbackOutput {
            png: encode_png(&canvas)?,
            path: GenerationPath::Fallback,
            degraded_guarantee: true,
        })
    }
}

/// Brightness, saturation and sharpening scaled linearly by Beautify intensity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolishAdjustment {
    pub brightness: f32,
    pub saturation: f32,
    pub sharpen: bool,
}

impl PolishAdjustment {
    pub fn for_intensity(intensity: u8) -> Self {
        let intensity = intensity.clamp(BEAUTIFY_INTENSITY_RANGE.0, BEAUTIFY_INTENSITY_RANGE.1);
        let t = intensity as f32 / BEAUTIFY_INTENSITY_RANGE.1 as f32;
        Self {
            brightness: 1.0 + 0.1 * t,
            saturation: 1.0 + 0.2 * t,
            sharpen: t > 0.3,
        }
    }

    fn apply(&self, source: &DynamicImage) -> DynamicImage {
        let adjusted = DynamicImage::ImageRgba8(scale_color(
            &source.to_rgba8(),
            self.brightness,
            self.saturation,
        ));
        if self.sharpen {
            adjusted.unsharpen(1.0, 2)
        } else {
            adjusted
        }
    }
}

fn shift_appearance(source: &DynamicImage) -> DynamicImage {
    let scaled = scale_color(&source.to_rgba8(), ANONYMIZE_BRIGHTNESS, ANONYMIZE_SATURATION);
    DynamicImage::ImageRgba8(scaled).huerotate(ANONYMIZE_HUE_DEGREES)
}

/// Multiply brightness, then pull each channel toward or away from luma by `saturation`.
fn scale_color(source: &RgbaImage, brightness: f32, saturation: f32) -> RgbaImage {
    let mut out = source.clone();
    for pixel in out.pixels_mut() {
        let Rgba([r, g, b, a]) = *pixel;
        let [r, g, b] = [r, g, b].map(|c| c as f32 * brightness);
        let luma = 0.299 * r + 0.587 * g + 0.114 * b;
        let channel = |c: f32| (luma + (c - luma) * saturation).round().clamp(0.0, 255.0) as u8;
        *pixel = Rgba([channel(r), channel(g), channel(b), a]);
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("Fallback image processing failed: {0}")]
    Composite(#[from] CompositeError),

    #[error("Fallback invoked without the inputs validation guarantees")]
    MissingInput,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::DEFAULT_BEAUTIFY_INTENSITY;

    fn png(rgb: [u8; 3]) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(
            40,
            40,
            Rgba([rgb[0], rgb[1], rgb[2], 255]),
        ))
        .unwrap()
    }

    fn decoded(output: &FallbackOutput) -> RgbaImage {
        decode_image(&output.png).unwrap().to_rgba8()
    }

    #[test]
    fn test_adjustment_scales_with_intensity() {
        let low = PolishAdjustment::for_intensity(1);
        let high = PolishAdjustment::for_intensity(10);
        assert!(low.brightness < high.brightness);
        assert!(low.saturation < high.saturation);
        assert!(!low.sharpen);
        assert!(high.sharpen);
        assert!((high.brightness - 1.1).abs() < 1e-6);
        assert!((high.saturation - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_beautify_fallback_brightens_both_panels() {
        let engine = FallbackEngine::new();
        let params = JobParameters::default().with_beautify_intensity(10);
        let images = JobImages::both(png([100, 100, 100]), png([50, 80, 120]));

        let output = engine.produce(Mode::Beautify, &params, &images).unwrap();
        assert_eq!(output.path, GenerationPath::Fallback);
        assert!(!output.degraded_guarantee);

        let canvas = decoded(&output);
        assert_eq!(canvas.dimensions(), (1200, 1200));
        let left = canvas.get_pixel(299, 600);
        assert!(left[0] > 100, "left panel was not brightened: {left:?}");
    }

    #[test]
    fn test_beautify_fallback_without_both_images_is_internal_error() {
        let engine = FallbackEngine::new();
        let images = JobImages::new(Some(png([1, 2, 3])), None);
        let err = engine
            .produce(Mode::Beautify, &JobParameters::default(), &images)
            .unwrap_err();
        assert!(matches!(err, FallbackError::MissingInput));
    }

    #[test]
    fn test_anonymize_single_image_fills_both_panels() {
        let engine = FallbackEngine::new();
        let images = JobImages::new(None, Some(png([90, 140, 200])));

        let output = engine
            .produce(Mode::Anonymize, &JobParameters::default(), &images)
            .unwrap();
        assert_eq!(output.path, GenerationPath::Fallback);
        assert!(output.degraded_guarantee);

        let canvas = decoded(&output);
        let left = *canvas.get_pixel(299, 600);
        let right = *canvas.get_pixel(900, 600);
        assert_ne!(left, CanvasSpec::OUTPUT.background);
        assert_ne!(right, CanvasSpec::OUTPUT.background);
        assert_ne!(left, right);
    }

    #[test]
    fn test_anonymize_two_images_pass_through() {
        let engine = FallbackEngine::new();
        let images = JobImages::both(png([200, 0, 0]), png([0, 0, 200]));

        let output = engine
            .produce(Mode::Anonymize, &JobParameters::default(), &images)
            .unwrap();
        assert!(output.degraded_guarantee);
        let canvas = decoded(&output);
        assert!(canvas.get_pixel(299, 600)[0] > 190);
        assert!(canvas.get_pixel(900, 600)[2] > 190);
    }

    #[test]
    fn test_anonymize_without_images_is_placeholder() {
        let engine = FallbackEngine::new();
        let output = engine
            .produce(
                Mode::Anonymize,
                &JobParameters::default(),
                &JobImages::new(None, None),
            )
            .unwrap();
        assert_eq!(output.path, GenerationPath::Placeholder);

        let canvas = decoded(&output);
        assert_eq!(canvas.dimensions(), (1200, 1200));
        assert!(canvas.pixels().all(|p| *p == CanvasSpec::PLACEHOLDER_FILL));
    }

    #[test]
    fn test_corrupt_input_surfaces_as_error() {
        let engine = FallbackEngine::new();
        let images = JobImages::both(b"garbage".to_vec(), png([1, 1, 1]));
        let params = JobParameters::default().with_beautify_intensity(DEFAULT_BEAUTIFY_INTENSITY);
        assert!(matches!(
            engine.produce(Mode::Beautify, &params, &images),
            Err(FallbackError::Composite(_))
        ));
    }
}
