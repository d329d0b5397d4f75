//! Frequency-domain helpers shared by blur and deblur
//!
//! Planes are padded before transforming so the circular convolution implied
//! by the DFT never wraps image content into the region that is cropped back
//! out. Kernels are embedded with their anchor at the origin, which makes the
//! circular convolution line up with the spatial definition
//! `out(p) = sum_q K(q) * I(p - q + anchor)`.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::psf::Psf;
use crate::types::ExposureError;

/// How pixels outside a plane are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeMode {
    /// Outside pixels are zero
    Zero,
    /// Outside pixels repeat the nearest edge pixel
    #[default]
    Replicate,
}

impl fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeMode::Zero => f.write_str("zero"),
            EdgeMode::Replicate => f.write_str("replicate"),
        }
    }
}

impl FromStr for EdgeMode {
    type Err = ExposureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero" => Ok(EdgeMode::Zero),
            "replicate" | "edge" => Ok(EdgeMode::Replicate),
            other => Err(ExposureError::InvalidParameter(format!(
                "unknown edge mode '{}' (expected zero or replicate)",
                other
            ))),
        }
    }
}

/// Margins added around a plane, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Padding {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

impl Padding {
    /// Pad by the full kernel extent on every side
    pub fn for_kernel(psf: &Psf) -> Self {
        Self {
            left: psf.width(),
            right: psf.width(),
            top: psf.height(),
            bottom: psf.height(),
        }
    }
}

/// Value of `src` at `(x, y)`, which may lie outside the plane
pub(crate) fn sample_edge<T: Copy + Into<f64>>(
    src: &[T],
    width: usize,
    height: usize,
    x: isize,
    y: isize,
    mode: EdgeMode,
) -> f64 {
    let inside = x >= 0 && y >= 0 && (x as usize) < width && (y as usize) < height;
    match mode {
        _ if inside => src[y as usize * width + x as usize].into(),
        EdgeMode::Zero => 0.0,
        EdgeMode::Replicate => {
            let cx = x.clamp(0, width as isize - 1) as usize;
            let cy = y.clamp(0, height as isize - 1) as usize;
            src[cy * width + cx].into()
        }
    }
}

/// Pad a plane into a complex buffer of `(width + left + right) x
/// (height + top + bottom)`
pub(crate) fn pad_plane<T: Copy + Into<f64>>(
    src: &[T],
    width: usize,
    height: usize,
    pad: Padding,
    mode: EdgeMode,
) -> (Vec<Complex<f64>>, usize, usize) {
    let pw = width + pad.left + pad.right;
    let ph = height + pad.top + pad.bottom;
    let mut out = Vec::with_capacity(pw * ph);
    for y in 0..ph {
        let sy = y as isize - pad.top as isize;
        for x in 0..pw {
            let sx = x as isize - pad.left as isize;
            out.push(Complex::new(sample_edge(src, width, height, sx, sy, mode), 0.0));
        }
    }
    (out, pw, ph)
}

/// Copy the real part of a `width x height` window starting at `pad`
pub(crate) fn crop_real(
    data: &[Complex<f64>],
    padded_width: usize,
    pad: Padding,
    width: usize,
    height: usize,
) -> Vec<f32> {
    crop_window(data, padded_width, pad, width, height)
        .into_iter()
        .map(|v| v as f32)
        .collect()
}

/// [`crop_real`] at full precision
pub(crate) fn crop_window(
    data: &[Complex<f64>],
    padded_width: usize,
    pad: Padding,
    width: usize,
    height: usize,
) -> Vec<f64> {
    let mut out = Vec::with_capacity(width * height);
    for y in 0..height {
        let row = (y + pad.top) * padded_width + pad.left;
        out.extend(data[row..row + width].iter().map(|c| c.re));
    }
    out
}

/// Adjoint of [`pad_plane`]: every padded sample is added back onto the
/// pixel it was read from. Zero-mode margins read nothing and are dropped.
pub(crate) fn fold_padding(
    data: &[Complex<f64>],
    width: usize,
    height: usize,
    pad: Padding,
    mode: EdgeMode,
) -> Vec<f64> {
    let pw = width + pad.left + pad.right;
    let ph = height + pad.top + pad.bottom;
    let mut out = vec![0.0; width * height];
    for y in 0..ph {
        let sy = y as isize - pad.top as isize;
        for x in 0..pw {
            let sx = x as isize - pad.left as isize;
            let inside = sx >= 0 && sy >= 0 && (sx as usize) < width && (sy as usize) < height;
            let target = match mode {
                _ if inside => sy as usize * width + sx as usize,
                EdgeMode::Zero => continue,
                EdgeMode::Replicate => {
                    let cx = sx.clamp(0, width as isize - 1) as usize;
                    let cy = sy.clamp(0, height as isize - 1) as usize;
                    cy * width + cx
                }
            };
            out[target] += data[y * pw + x].re;
        }
    }
    out
}

/// Place the kernel in a `width x height` buffer with its anchor at the
/// origin, wrapping negative offsets around
pub(crate) fn embed_kernel(psf: &Psf, width: usize, height: usize) -> Vec<Complex<f64>> {
    let (ax, ay) = psf.anchor();
    let mut out = vec![Complex::new(0.0, 0.0); width * height];
    for ky in 0..psf.height() {
        let y = (ky as isize - ay as isize).rem_euclid(height as isize) as usize;
        for kx in 0..psf.width() {
            let x = (kx as isize - ax as isize).rem_euclid(width as isize) as usize;
            out[y * width + x] += Complex::new(psf.get(kx, ky), 0.0);
        }
    }
    out
}

/// Row-column 2-D FFT of a fixed size
pub(crate) struct Fft2d {
    width: usize,
    height: usize,
    row_forward: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2d {
    pub fn new(width: usize, height: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        Self {
            width,
            height,
            row_forward: planner.plan_fft_forward(width),
            col_forward: planner.plan_fft_forward(height),
            row_inverse: planner.plan_fft_inverse(width),
            col_inverse: planner.plan_fft_inverse(height),
        }
    }

    pub fn forward(&self, data: &mut [Complex<f64>]) {
        self.row_forward.process(data);
        let mut cols = transpose(data, self.width, self.height);
        self.col_forward.process(&mut cols);
        data.copy_from_slice(&transpose(&cols, self.height, self.width));
    }

    /// Inverse transform, including the `1 / (width * height)` scale
    pub fn inverse(&self, data: &mut [Complex<f64>]) {
        self.row_inverse.process(data);
        let mut cols = transpose(data, self.width, self.height);
        self.col_inverse.process(&mut cols);
        data.copy_from_slice(&transpose(&cols, self.height, self.width));
        let scale = 1.0 / (self.width * self.height) as f64;
        for v in data.iter_mut() {
            *v *= scale;
        }
    }
}

/// Transpose a row-major `width x height` buffer into `height x width`
fn transpose(data: &[Complex<f64>], width: usize, height: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); data.len()];
    for y in 0..height {
        for x in 0..width {
            out[x * height + y] = data[y * width + x];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_roundtrip() {
        let (w, h) = (6, 5);
        let original: Vec<Complex<f64>> = (0..w * h)
            .map(|i| Complex::new((i as f64 * 0.37).sin(), 0.0))
            .collect();
        let fft = Fft2d::new(w, h);
        let mut data = original.clone();
        fft.forward(&mut data);
        fft.inverse(&mut data);
        for (a, b) in data.iter().zip(&original) {
            assert!((a - b).norm() < 1e-12);
        }
    }

    #[test]
    fn test_dc_bin_is_sum() {
        let fft = Fft2d::new(3, 2);
        let mut data: Vec<Complex<f64>> = (1..=6).map(|v| Complex::new(v as f64, 0.0)).collect();
        fft.forward(&mut data);
        assert!((data[0].re - 21.0).abs() < 1e-12);
        assert!(data[0].im.abs() < 1e-12);
    }

    #[test]
    fn test_pad_replicate_and_zero() {
        let src = [1.0f32, 2.0, 3.0, 4.0];
        let pad = Padding {
            left: 1,
            right: 0,
            top: 0,
            bottom: 1,
        };
        let (rep, pw, ph) = pad_plane(&src, 2, 2, pad, EdgeMode::Replicate);
        assert_eq!((pw, ph), (3, 3));
        let rep: Vec<f64> = rep.iter().map(|c| c.re).collect();
        assert_eq!(rep, vec![1.0, 1.0, 2.0, 3.0, 3.0, 4.0, 3.0, 3.0, 4.0]);

        let (zero, _, _) = pad_plane(&src, 2, 2, pad, EdgeMode::Zero);
        let zero: Vec<f64> = zero.iter().map(|c| c.re).collect();
        assert_eq!(zero, vec![0.0, 1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 0.0, 0.0]);

        assert_eq!(crop_real(&zero_complex(&zero), 3, pad, 2, 2), vec![1.0, 2.0, 3.0, 4.0]);
    }

    fn zero_complex(v: &[f64]) -> Vec<Complex<f64>> {
        v.iter().map(|&r| Complex::new(r, 0.0)).collect()
    }

    #[test]
    fn test_fold_is_adjoint_of_pad() {
        let (w, h) = (4, 3);
        let pad = Padding {
            left: 2,
            right: 1,
            top: 1,
            bottom: 2,
        };
        let x: Vec<f64> = (0..w * h).map(|i| (i as f64 * 0.71).sin()).collect();
        let (pw, ph) = (w + 3, h + 3);
        let y: Vec<Complex<f64>> = (0..pw * ph)
            .map(|i| Complex::new((i as f64 * 1.3).cos(), 0.0))
            .collect();
        for mode in [EdgeMode::Replicate, EdgeMode::Zero] {
            let (padded, _, _) = pad_plane(&x, w, h, pad, mode);
            let lhs: f64 = padded.iter().zip(&y).map(|(a, b)| a.re * b.re).sum();
            let folded = fold_padding(&y, w, h, pad, mode);
            let rhs: f64 = x.iter().zip(&folded).map(|(a, b)| a * b).sum();
            assert!((lhs - rhs).abs() < 1e-12, "{:?}: {} vs {}", mode, lhs, rhs);
        }
    }

    #[test]
    fn test_embed_kernel_wraps_anchor() {
        let psf = Psf::from_weights(3, 1, vec![1.0, 2.0, 1.0], (1, 0)).unwrap();
        let k = embed_kernel(&psf, 5, 2);
        let row: Vec<f64> = k[..5].iter().map(|c| c.re).collect();
        assert_eq!(row, vec![0.5, 0.25, 0.0, 0.0, 0.25]);
        assert!(k[5..].iter().all(|c| c.re == 0.0));
    }

    #[test]
    fn test_edge_mode_parse() {
        assert_eq!("zero".parse::<EdgeMode>().unwrap(), EdgeMode::Zero);
        assert_eq!("Replicate".parse::<EdgeMode>().unwrap(), EdgeMode::Replicate);
        assert!("mirror".parse::<EdgeMode>().is_err());
    }
}
