//! Point-spread function construction
//!
//! Expands a 1-D [`ExposureCode`] into a 2-D kernel oriented along the
//! motion angle. Each open chip covers one pixel of travel; with a subpixel
//! factor `s` the chip is sampled `s` times along its pixel and every sample
//! is bilinearly splatted onto the grid, which keeps diagonal kernels free of
//! staircase aliasing.
//!
//! [`PsfBuilder::build_with_length`] stretches or squeezes the code to a
//! different travel length first, linearly interpolating chip weights.
//!
//! Angles follow image coordinates: 0° moves right, 90° moves down.

use tracing::debug;

use crate::code::ExposureCode;
use crate::types::{ExposureError, Result};

/// Direction components smaller than this are treated as exactly zero
const DIRECTION_EPSILON: f64 = 1e-12;

/// Normalized blur kernel with an anchor pixel
#[derive(Debug, Clone, PartialEq)]
pub struct Psf {
    width: usize,
    height: usize,
    weights: Vec<f64>,
    anchor: (usize, usize),
}

impl Psf {
    /// Build a kernel from raw weights; the weights are normalized to sum 1
    pub fn from_weights(
        width: usize,
        height: usize,
        weights: Vec<f64>,
        anchor: (usize, usize),
    ) -> Result<Self> {
        if width == 0 || height == 0 || weights.len() != width * height {
            return Err(ExposureError::DimensionMismatch {
                expected: format!("{} weights ({}x{})", width * height, width, height),
                actual: format!("{} weights", weights.len()),
            });
        }
        if anchor.0 >= width || anchor.1 >= height {
            return Err(ExposureError::InvalidParameter(format!(
                "anchor {:?} outside {}x{} kernel",
                anchor, width, height
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ExposureError::InvalidParameter(
                "kernel weights must be finite and non-negative".to_string(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(ExposureError::InvalidParameter(
                "kernel has no mass".to_string(),
            ));
        }
        Ok(Self {
            width,
            height,
            weights: weights.into_iter().map(|w| w / total).collect(),
            anchor,
        })
    }

    /// 1x1 kernel that leaves an image unchanged
    pub fn identity() -> Self {
        Self {
            width: 1,
            height: 1,
            weights: vec![1.0],
            anchor: (0, 0),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// `(width, height)`
    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Pixel that aligns with the output pixel during convolution
    pub fn anchor(&self) -> (usize, usize) {
        self.anchor
    }

    /// Row-major weights
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.weights[y * self.width + x]
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Centre of mass relative to the anchor, in pixels.
    ///
    /// This is how far the blurred silhouette's mass is displaced from where
    /// the sharp object sits.
    pub fn centroid(&self) -> (f64, f64) {
        let (ax, ay) = (self.anchor.0 as f64, self.anchor.1 as f64);
        let mut cx = 0.0;
        let mut cy = 0.0;
        for y in 0..self.height {
            for x in 0..self.width {
                let w = self.get(x, y);
                cx += w * (x as f64 - ax);
                cy += w * (y as f64 - ay);
            }
        }
        (cx, cy)
    }
}

/// Builds oriented kernels from exposure codes
pub struct PsfBuilder;

impl PsfBuilder {
    /// Build the kernel for `code` moving along `angle_degrees`.
    ///
    /// Axis-aligned angles take a 1-D path that produces a single row or
    /// column; every other angle is splatted in 2-D.
    pub fn build(code: &ExposureCode, angle_degrees: f64, subpixel: usize) -> Result<Psf> {
        Self::build_from_chips(&chip_weights(code), angle_degrees, subpixel)
    }

    /// Build the kernel for `code` spread over `blur_length` pixels of
    /// travel instead of one pixel per chip.
    ///
    /// Chip `i` of the resampled code reads the original code at
    /// `i / blur_length * (len - 1)` with linear interpolation, so a length
    /// equal to the code length reproduces [`PsfBuilder::build`].
    pub fn build_with_length(
        code: &ExposureCode,
        angle_degrees: f64,
        subpixel: usize,
        blur_length: usize,
    ) -> Result<Psf> {
        if blur_length == 0 {
            return Err(ExposureError::InvalidParameter(
                "blur length must be >= 1".to_string(),
            ));
        }
        let chips = chip_weights(code);
        let resampled = if blur_length == chips.len() {
            chips
        } else {
            resample_chips(&chips, blur_length)
        };
        debug!(code_length = code.len(), blur_length, "resampled exposure code");
        Self::build_from_chips(&resampled, angle_degrees, subpixel)
    }

    fn build_from_chips(chips: &[f64], angle_degrees: f64, subpixel: usize) -> Result<Psf> {
        let angle = validate(angle_degrees, subpixel)?;
        let psf = match axis_direction(angle) {
            Some(dir) => build_axis_aligned(chips, dir, subpixel),
            None => build_general(chips, angle, subpixel),
        }?;
        debug!(
            angle,
            subpixel,
            width = psf.width,
            height = psf.height,
            "built PSF"
        );
        Ok(psf)
    }
}

fn chip_weights(code: &ExposureCode) -> Vec<f64> {
    code.chips().iter().map(|&c| f64::from(c)).collect()
}

/// Linear resampling of chip weights to `length` chips
fn resample_chips(chips: &[f64], length: usize) -> Vec<f64> {
    let last = chips.len().saturating_sub(1);
    (0..length)
        .map(|i| {
            let t = i as f64 / length as f64 * last as f64;
            let lo = t.floor() as usize;
            let hi = (lo + 1).min(last);
            let f = t - lo as f64;
            chips[lo] * (1.0 - f) + chips[hi] * f
        })
        .collect()
}

fn validate(angle_degrees: f64, subpixel: usize) -> Result<f64> {
    if !angle_degrees.is_finite() {
        return Err(ExposureError::InvalidParameter(format!(
            "angle must be finite, got {}",
            angle_degrees
        )));
    }
    if subpixel < 1 {
        return Err(ExposureError::InvalidParameter(
            "subpixel factor must be >= 1".to_string(),
        ));
    }
    Ok(angle_degrees.rem_euclid(360.0))
}

/// Unit step per pixel of travel for the four axis angles
fn axis_direction(angle: f64) -> Option<(i64, i64)> {
    match angle {
        a if a == 0.0 => Some((1, 0)),
        a if a == 90.0 => Some((0, 1)),
        a if a == 180.0 => Some((-1, 0)),
        a if a == 270.0 => Some((0, -1)),
        _ => None,
    }
}

/// Travel position (in pixels from the start) and weight of every open
/// sample
fn sample_positions(chips: &[f64], subpixel: usize) -> impl Iterator<Item = (f64, f64)> + '_ {
    chips
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c > 0.0)
        .flat_map(move |(i, &c)| {
            (0..subpixel).map(move |j| (i as f64 + j as f64 / subpixel as f64, c))
        })
}

/// Distance travelled by the last sample
fn travel_extent(chip_count: usize, subpixel: usize) -> f64 {
    (chip_count - 1) as f64 + (subpixel - 1) as f64 / subpixel as f64
}

fn build_axis_aligned(chips: &[f64], dir: (i64, i64), subpixel: usize) -> Result<Psf> {
    let sign = (dir.0 + dir.1) as f64;
    let mut taps: Vec<(i64, f64)> = Vec::new();
    for (t, c) in sample_positions(chips, subpixel) {
        let p = t * sign;
        let p0 = p.floor();
        let f = p - p0;
        taps.push((p0 as i64, c * (1.0 - f)));
        if f > 0.0 {
            taps.push((p0 as i64 + 1, c * f));
        }
    }

    // The kernel spans the whole travel, closed chips included.
    let end = travel_extent(chips.len(), subpixel) * sign;
    let lo = taps.iter().map(|t| t.0).fold(end.min(0.0).floor() as i64, i64::min);
    let hi = taps.iter().map(|t| t.0).fold(end.max(0.0).ceil() as i64, i64::max);
    let len = (hi - lo + 1) as usize;
    let mut line = vec![0.0; len];
    for (i, w) in taps {
        line[(i - lo) as usize] += w;
    }

    let mid = (travel_extent(chips.len(), subpixel) / 2.0 * sign).round() as i64;
    let along = (mid - lo).clamp(0, len as i64 - 1) as usize;
    if dir.0 != 0 {
        Psf::from_weights(len, 1, line, (along, 0))
    } else {
        Psf::from_weights(1, len, line, (0, along))
    }
}

/// General bilinear splat along an arbitrary direction
fn build_general(chips: &[f64], angle: f64, subpixel: usize) -> Result<Psf> {
    let rad = angle.to_radians();
    let snap = |v: f64| {
        if v.abs() < DIRECTION_EPSILON {
            0.0
        } else if (v.abs() - 1.0).abs() < DIRECTION_EPSILON {
            v.signum()
        } else {
            v
        }
    };
    let (dx, dy) = (snap(rad.cos()), snap(rad.sin()));

    let mut taps: Vec<(i64, i64, f64)> = Vec::new();
    for (t, c) in sample_positions(chips, subpixel) {
        let (x, y) = (t * dx, t * dy);
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (ix, iy) = (x0 as i64, y0 as i64);
        for (ox, wx) in [(0, 1.0 - fx), (1, fx)] {
            for (oy, wy) in [(0, 1.0 - fy), (1, fy)] {
                let w = c * wx * wy;
                if w > 0.0 {
                    taps.push((ix + ox, iy + oy, w));
                }
            }
        }
    }

    let half = travel_extent(chips.len(), subpixel) / 2.0;
    let (end_x, end_y) = (2.0 * half * dx, 2.0 * half * dy);
    let min_x = taps.iter().map(|t| t.0).fold(end_x.min(0.0).floor() as i64, i64::min);
    let max_x = taps.iter().map(|t| t.0).fold(end_x.max(0.0).ceil() as i64, i64::max);
    let min_y = taps.iter().map(|t| t.1).fold(end_y.min(0.0).floor() as i64, i64::min);
    let max_y = taps.iter().map(|t| t.1).fold(end_y.max(0.0).ceil() as i64, i64::max);
    let width = (max_x - min_x + 1) as usize;
    let height = (max_y - min_y + 1) as usize;

    let mut weights = vec![0.0; width * height];
    for (x, y, w) in taps {
        weights[(y - min_y) as usize * width + (x - min_x) as usize] += w;
    }

    let ax = ((half * dx).round() as i64 - min_x).clamp(0, width as i64 - 1) as usize;
    let ay = ((half * dy).round() as i64 - min_y).clamp(0, height as i64 - 1) as usize;
    Psf::from_weights(width, height, weights, (ax, ay))
}
