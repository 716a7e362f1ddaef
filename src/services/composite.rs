//! Fixed-layout side-by-side composites.
//!
//! A canvas is a square split into two equal vertical panels with a thin
//! divider between them. Sources are scaled to fit inside their panel with
//! aspect ratio preserved and centered; the margins keep the background color.
//! All geometry is computed here in integer space so panel boundaries do not
//! depend on the resize filter.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Panel boundaries of a canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelLayout {
    pub left: Rect,
    pub divider: Rect,
    pub right: Rect,
}

/// Fixed canvas parameters of one composite use site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasSpec {
    pub size: u32,
    pub divider_width: u32,
    pub divider_color: Rgba<u8>,
    pub background: Rgba<u8>,
}

impl CanvasSpec {
    /// Final output image: 1200px square, 4px light-grey divider.
    pub const OUTPUT: CanvasSpec = CanvasSpec {
        size: 1200,
        divider_width: 4,
        divider_color: Rgba([200, 200, 200, 255]),
        background: Rgba([255, 255, 255, 255]),
    };

    /// Packaging of two inputs for the generation model: 800px square, 4px white divider.
    pub const MODEL_INPUT: CanvasSpec = CanvasSpec {
        size: 800,
        divider_width: 4,
        divider_color: Rgba([255, 255, 255, 255]),
        background: Rgba([255, 255, 255, 255]),
    };

    /// Neutral fill used for placeholder results.
    pub const PLACEHOLDER_FILL: Rgba<u8> = Rgba([240, 240, 240, 255]);

    /// Panels are always equal; an odd leftover pixel widens the divider.
    pub fn layout(&self) -> PanelLayout {
        let panel_width = (self.size - self.divider_width.min(self.size)) / 2;
        let divider_width = self.size - 2 * panel_width;
        let right_x = panel_width + divider_width;

        PanelLayout {
            left: Rect {
                x: 0,
                y: 0,
                width: panel_width,
                height: self.size,
            },
            divider: Rect {
                x: panel_width,
                y: 0,
                width: divider_width,
                height: self.size,
            },
            right: Rect {
                x: right_x,
                y: 0,
                width: self.size - right_x,
                height: self.size,
            },
        }
    }
}

/// Where a `source_width`×`source_height` image lands inside `panel`:
/// scaled to fit (up or down) with aspect ratio kept, centered on both axes.
pub fn fit_within(source_width: u32, source_height: u32, panel: Rect) -> Rect {
    if source_width == 0 || source_height == 0 || panel.width == 0 || panel.height == 0 {
        return Rect {
            x: panel.x + panel.width / 2,
            y: panel.y + panel.height / 2,
            width: 0,
            height: 0,
        };
    }

    let scale = f64::min(
        panel.width as f64 / source_width as f64,
        panel.height as f64 / source_height as f64,
    );
    let width = ((source_width as f64 * scale).round() as u32).clamp(1, panel.width);
    let height = ((source_height as f64 * scale).round() as u32).clamp(1, panel.height);

    Rect {
        x: panel.x + (panel.width - width) / 2,
        y: panel.y + (panel.height - height) / 2,
        width,
        height,
    }
}

pub struct CompositeBuilder {
    spec: CanvasSpec,
}

impl CompositeBuilder {
    pub fn new(spec: CanvasSpec) -> Self {
        Self { spec }
    }

    pub fn output() -> Self {
        Self::new(CanvasSpec::OUTPUT)
    }

    pub fn model_input() -> Self {
        Self::new(CanvasSpec::MODEL_INPUT)
    }

    pub fn spec(&self) -> &CanvasSpec {
        &self.spec
    }

    /// Arrange `left` and `right` into the fixed two-panel canvas.
    pub fn compose(&self, left: &DynamicImage, right: &DynamicImage) -> RgbaImage {
        let layout = self.spec.layout();
        let mut canvas = RgbaImage::from_pixel(self.spec.size, self.spec.size, self.spec.background);

        fill(&mut canvas, layout.divider, self.spec.divider_color);
        place(&mut canvas, left, layout.left);
        place(&mut canvas, right, layout.right);
        canvas
    }

    /// Decode two encoded images and return the composite as PNG bytes.
    pub fn compose_encoded(&self, left: &[u8], right: &[u8]) -> Result<Vec<u8>, CompositeError> {
        let left = decode_image(left)?;
        let right = decode_image(right)?;
        encode_png(&self.compose(&left, &right))
    }

    /// A solid canvas of the configured dimensions.
    pub fn placeholder(&self, fill_color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(self.spec.size, self.spec.size, fill_color)
    }

    /// Fit an already-composed image onto the canvas as a whole.
    ///
    /// Model output of the right size passes through untouched.
    pub fn conform(&self, source: &DynamicImage) -> RgbaImage {
        if source.width() == self.spec.size && source.height() == self.spec.size {
            return source.to_rgba8();
        }
        let mut canvas = RgbaImage::from_pixel(self.spec.size, self.spec.size, self.spec.background);
        let whole = Rect {
            x: 0,
            y: 0,
            width: self.spec.size,
            height: self.spec.size,
        };
        place(&mut canvas, source, whole);
        canvas
    }
}

fn place(canvas: &mut RgbaImage, source: &DynamicImage, panel: Rect) {
    let target = fit_within(source.width(), source.height(), panel);
    if target.width == 0 || target.height == 0 {
        return;
    }
    let resized = source
        .resize_exact(target.width, target.height, FilterType::Lanczos3)
        .to_rgba8();
    imageops::overlay(canvas, &resized, target.x as i64, target.y as i64);
}

fn fill(canvas: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            canvas.put_pixel(x, y, color);
        }
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, CompositeError> {
    Ok(image::load_from_memory(bytes)?)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, CompositeError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),
}
