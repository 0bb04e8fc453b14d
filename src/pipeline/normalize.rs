//! Image normalisation ahead of recognition.
//!
//! Three deterministic steps, in order:
//!
//! 1. resize so the long edge equals the canonical target (aspect kept)
//! 2. convert to single-channel 8-bit grayscale
//! 3. stretch contrast so the 1st–99th luminance percentiles span 0–255
//!
//! The percentile clip keeps a few stray black or white pixels (dust,
//! borders) from defeating the stretch on washed-out scans.

use image::imageops::FilterType;
use image::{GrayImage, ImageError};
use tracing::debug;

/// Fraction of pixels ignored at each end of the histogram.
const CLIP_FRACTION: f64 = 0.01;

/// Turns a raw raster into an image ready for recognition.
pub trait Normalizer: Send + Sync {
    /// Decode and normalise `raw` (any supported encoded image format).
    ///
    /// Fails only when the input cannot be decoded.
    fn normalize(&self, raw: &[u8]) -> Result<GrayImage, ImageError>;
}

/// Resize + grayscale + percentile contrast stretch.
#[derive(Debug, Clone, Copy)]
pub struct ContrastNormalizer {
    long_edge: u32,
}

impl ContrastNormalizer {
    pub fn new(long_edge: u32) -> Self {
        Self { long_edge }
    }
}

impl Normalizer for ContrastNormalizer {
    fn normalize(&self, raw: &[u8]) -> Result<GrayImage, ImageError> {
        let decoded = image::load_from_memory(raw)?;
        let (w, h) = (decoded.width(), decoded.height());
        let resized = decoded.resize(self.long_edge, self.long_edge, FilterType::Lanczos3);
        let mut gray = resized.to_luma8();
        stretch_contrast(&mut gray);
        debug!(
            "Normalised {}x{} → {}x{} grayscale",
            w,
            h,
            gray.width(),
            gray.height()
        );
        Ok(gray)
    }
}

/// Linearly map the clipped luminance range onto 0–255 in place.
///
/// Images with a single luminance level are left untouched.
pub fn stretch_contrast(img: &mut GrayImage) {
    let total = img.pixels().len();
    if total == 0 {
        return;
    }

    let mut histogram = [0usize; 256];
    for p in img.pixels() {
        histogram[p.0[0] as usize] += 1;
    }

    let clip = (total as f64 * CLIP_FRACTION) as usize;
    let low = percentile_from_low(&histogram, clip);
    let high = percentile_from_high(&histogram, clip);
    if high <= low {
        return;
    }

    let range = (high - low) as u32;
    for p in img.pixels_mut() {
        let v = p.0[0].clamp(low, high);
        p.0[0] = (((v - low) as u32 * 255 + range / 2) / range) as u8;
    }
}

fn percentile_from_low(histogram: &[usize; 256], clip: usize) -> u8 {
    let mut seen = 0usize;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen > clip {
            return value as u8;
        }
    }
    255
}

fn percentile_from_high(histogram: &[usize; 256], clip: usize) -> u8 {
    let mut seen = 0usize;
    for (value, &count) in histogram.iter().enumerate().rev() {
        seen += count;
        if seen > clip {
            return value as u8;
        }
    }
    0
}
