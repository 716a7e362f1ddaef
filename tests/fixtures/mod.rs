//! In-memory photo fixtures
//!
//! Synthetic "photos" with enough structure that encoders produce realistic,
//! non-trivial payloads (well above the model's minimum input size).

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// A synthetic input photo.
#[derive(Debug, Clone, Copy)]
pub struct PhotoFixture {
    pub name: &'static str,
    pub width: u32,
    pub height: u32,
    pub tint: [u8; 3],
    pub format: ImageFormat,
}

pub const PORTRAIT_BEFORE: PhotoFixture = PhotoFixture {
    name: "portrait_before",
    width: 96,
    height: 128,
    tint: [180, 120, 100],
    format: ImageFormat::Png,
};

pub const PORTRAIT_AFTER: PhotoFixture = PhotoFixture {
    name: "portrait_after",
    width: 96,
    height: 128,
    tint: [190, 140, 120],
    format: ImageFormat::Png,
};

pub const LANDSCAPE_JPEG: PhotoFixture = PhotoFixture {
    name: "landscape_jpeg",
    width: 160,
    height: 90,
    tint: [90, 110, 160],
    format: ImageFormat::Jpeg,
};

pub const ALL_PHOTOS: &[PhotoFixture] = &[PORTRAIT_BEFORE, PORTRAIT_AFTER, LANDSCAPE_JPEG];

impl PhotoFixture {
    pub fn image(&self) -> DynamicImage {
        let [r, g, b] = self.tint;
        let (w, h) = (self.width, self.height);
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            let fx = (x * 64 / w) as u8;
            let fy = (y * 64 / h) as u8;
            let grain = ((x * 7 + y * 13) % 11) as u8;
            Rgb([
                r.saturating_sub(fx / 2).saturating_add(grain),
                g.saturating_add(fy / 2),
                b.saturating_sub(fy / 3).saturating_add(fx / 4),
            ])
        }))
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        self.image()
            .write_to(&mut buffer, self.format)
            .expect("fixture encodes");
        buffer.into_inner()
    }
}

/// A photo distinct from every other call with a different `seed`.
pub fn unique_photo(seed: u8) -> Vec<u8> {
    PhotoFixture {
        name: "unique",
        width: 64,
        height: 64,
        tint: [seed, 255 - seed, seed / 2 + 60],
        format: ImageFormat::Png,
    }
    .bytes()
}
