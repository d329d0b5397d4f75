//! Image quality metrics
//!
//! Values are compared on the 8-bit scale: each sample is clamped to
//! `[0, 1]` and multiplied by 255, which matches comparing saved images.

use crate::patch::{ImagePatch, COLOR_CHANNELS};
use crate::types::{ExposureError, Result};

/// PSNR reported for identical images
pub const IDENTICAL_PSNR: f64 = 100.0;

const PEAK: f64 = 255.0;

/// Mean squared error over the color channels, 0-255 scale
pub fn mse(reference: &ImagePatch, processed: &ImagePatch) -> Result<f64> {
    if reference.dimensions() != processed.dimensions() {
        return Err(ExposureError::size_mismatch(
            reference.dimensions(),
            processed.dimensions(),
        ));
    }
    let scaled = |v: f32| (v.clamp(0.0, 1.0) as f64) * PEAK;

    let mut sum = 0.0f64;
    let mut count = 0usize;
    for c in 0..COLOR_CHANNELS {
        for (a, b) in reference.channel(c).iter().zip(processed.channel(c)) {
            let d = scaled(*a) - scaled(*b);
            sum += d * d;
            count += 1;
        }
    }
    if count == 0 {
        return Err(ExposureError::InvalidParameter("empty image".to_string()));
    }
    Ok(sum / count as f64)
}

/// Root mean squared error, 0-255 scale
pub fn rmse(reference: &ImagePatch, processed: &ImagePatch) -> Result<f64> {
    Ok(mse(reference, processed)?.sqrt())
}

/// Peak signal-to-noise ratio in dB
pub fn psnr(reference: &ImagePatch, processed: &ImagePatch) -> Result<f64> {
    let mse = mse(reference, processed)?;
    if mse == 0.0 {
        return Ok(IDENTICAL_PSNR);
    }
    Ok(20.0 * (PEAK / mse.sqrt()).log10())
}
