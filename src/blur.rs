//! Coded motion blur
//!
//! Convolves every plane of a foreground patch (color and alpha) with the
//! same PSF, producing a patch of identical size. Blurring the alpha mask
//! with the color keeps the soft silhouette consistent with the smeared
//! color, so compositing the result does not leave fringes.
//!
//! # Algorithm
//!
//! 1. Pad each plane by the kernel extent (edge replication by default)
//! 2. Multiply plane and kernel spectra
//! 3. Inverse-transform and crop back to the input size
//!
//! Small kernels may use direct spatial convolution instead; both paths
//! evaluate `out(p) = sum_q K(q) * I(p - q + anchor)` with the same edge
//! handling and agree to floating point precision.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fft::{crop_real, embed_kernel, pad_plane, sample_edge, EdgeMode, Fft2d, Padding};
use crate::patch::ImagePatch;
use crate::psf::Psf;
use crate::types::Result;

// ============================================================
// Constants
// ============================================================

/// Largest kernel area (in taps) that `Auto` convolves spatially
const SPATIAL_KERNEL_LIMIT: usize = 49;

// ============================================================
// Types
// ============================================================

/// Convolution strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvolutionMethod {
    /// Spatial for small kernels, frequency domain otherwise
    #[default]
    Auto,
    /// Direct sum over kernel taps
    Spatial,
    /// FFT multiplication
    Frequency,
}

/// Options for blur processing
#[derive(Debug, Clone, PartialEq)]
pub struct BlurOptions {
    /// How pixels beyond the patch border are filled
    pub edge_mode: EdgeMode,

    /// Convolution strategy
    pub method: ConvolutionMethod,
}

impl Default for BlurOptions {
    fn default() -> Self {
        Self {
            edge_mode: EdgeMode::Replicate,
            method: ConvolutionMethod::Auto,
        }
    }
}

impl BlurOptions {
    /// Create a builder
    pub fn builder() -> BlurOptionsBuilder {
        BlurOptionsBuilder::default()
    }

    /// Treat everything outside the patch as transparent black
    pub fn zero_padded() -> Self {
        Self {
            edge_mode: EdgeMode::Zero,
            ..Default::default()
        }
    }
}

/// Builder for BlurOptions
#[derive(Debug, Default)]
pub struct BlurOptionsBuilder {
    options: BlurOptions,
}

impl BlurOptionsBuilder {
    /// Set edge mode
    #[must_use]
    pub fn edge_mode(mut self, mode: EdgeMode) -> Self {
        self.options.edge_mode = mode;
        self
    }

    /// Set convolution method
    #[must_use]
    pub fn method(mut self, method: ConvolutionMethod) -> Self {
        self.options.method = method;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> BlurOptions {
        self.options
    }
}

// ============================================================
// Blur Engine
// ============================================================

/// Applies a PSF to image patches
pub struct BlurEngine;

impl BlurEngine {
    /// Blur with default options
    pub fn apply(foreground: &ImagePatch, psf: &Psf) -> Result<ImagePatch> {
        Self::apply_with_options(foreground, psf, &BlurOptions::default())
    }

    /// Blur every plane of `foreground`, alpha included
    pub fn apply_with_options(
        foreground: &ImagePatch,
        psf: &Psf,
        options: &BlurOptions,
    ) -> Result<ImagePatch> {
        let (width, height) = foreground.dimensions();
        let method = resolve_method(options.method, psf);
        debug!(
            width,
            height,
            kernel_width = psf.width(),
            kernel_height = psf.height(),
            ?method,
            edge_mode = %options.edge_mode,
            "blurring patch"
        );

        foreground.map_planes(|plane| {
            Ok(Self::convolve_plane(
                plane,
                width,
                height,
                psf,
                options.edge_mode,
                method,
            ))
        })
    }

    /// Convolve a single row-major plane
    pub fn convolve_plane(
        plane: &[f32],
        width: usize,
        height: usize,
        psf: &Psf,
        edge_mode: EdgeMode,
        method: ConvolutionMethod,
    ) -> Vec<f32> {
        match resolve_method(method, psf) {
            ConvolutionMethod::Spatial => convolve_spatial(plane, width, height, psf, edge_mode),
            _ => convolve_frequency(plane, width, height, psf, edge_mode),
        }
    }
}

fn resolve_method(method: ConvolutionMethod, psf: &Psf) -> ConvolutionMethod {
    match method {
        ConvolutionMethod::Auto if psf.width() * psf.height() <= SPATIAL_KERNEL_LIMIT => {
            ConvolutionMethod::Spatial
        }
        ConvolutionMethod::Auto => ConvolutionMethod::Frequency,
        other => other,
    }
}

fn convolve_spatial(
    plane: &[f32],
    width: usize,
    height: usize,
    psf: &Psf,
    edge_mode: EdgeMode,
) -> Vec<f32> {
    let (ax, ay) = (psf.anchor().0 as isize, psf.anchor().1 as isize);
    let taps: Vec<(isize, isize, f64)> = (0..psf.height())
        .flat_map(|ky| (0..psf.width()).map(move |kx| (kx, ky)))
        .map(|(kx, ky)| (ax - kx as isize, ay - ky as isize, psf.get(kx, ky)))
        .filter(|&(_, _, w)| w != 0.0)
        .collect();

    let mut out = Vec::with_capacity(width * height);
    for y in 0..height as isize {
        for x in 0..width as isize {
            let sum: f64 = taps
                .iter()
                .map(|&(dx, dy, w)| w * sample_edge(plane, width, height, x + dx, y + dy, edge_mode))
                .sum();
            out.push(sum as f32);
        }
    }
    out
}

fn convolve_frequency(
    plane: &[f32],
    width: usize,
    height: usize,
    psf: &Psf,
    edge_mode: EdgeMode,
) -> Vec<f32> {
    let pad = Padding::for_kernel(psf);
    let (mut data, pw, ph) = pad_plane(plane, width, height, pad, edge_mode);
    let mut kernel = embed_kernel(psf, pw, ph);

    let fft = Fft2d::new(pw, ph);
    fft.forward(&mut data);
    fft.forward(&mut kernel);
    for (d, k) in data.iter_mut().zip(&kernel) {
        *d *= k;
    }
    fft.inverse(&mut data);

    crop_real(&data, pw, pad, width, height)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{CodeGenerator, CodeKind};
    use crate::psf::PsfBuilder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise_patch(width: usize, height: usize, seed: u64) -> ImagePatch {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut plane = || (0..width * height).map(|_| rng.gen_range(0.0f32..1.0)).collect::<Vec<_>>();
        let color = [plane(), plane(), plane()];
        let alpha = plane();
        ImagePatch::from_planes(width, height, color, Some(alpha)).unwrap()
    }

    fn max_abs_diff(a: &ImagePatch, b: &ImagePatch) -> f32 {
        let mut worst = 0.0f32;
        for c in 0..3 {
            for (x, y) in a.channel(c).iter().zip(b.channel(c)) {
                worst = worst.max((x - y).abs());
            }
        }
        if let (Some(aa), Some(ba)) = (a.alpha(), b.alpha()) {
            for (x, y) in aa.iter().zip(ba) {
                worst = worst.max((x - y).abs());
            }
        }
        worst
    }

    #[test]
    fn test_blur_options_default() {
        let opts = BlurOptions::default();
        assert_eq!(opts.edge_mode, EdgeMode::Replicate);
        assert_eq!(opts.method, ConvolutionMethod::Auto);
    }

    #[test]
    fn test_blur_options_builder() {
        let opts = BlurOptions::builder()
            .edge_mode(EdgeMode::Zero)
            .method(ConvolutionMethod::Frequency)
            .build();
        assert_eq!(opts.edge_mode, EdgeMode::Zero);
        assert_eq!(opts.method, ConvolutionMethod::Frequency);
        assert_eq!(BlurOptions::zero_padded().edge_mode, EdgeMode::Zero);
    }

    #[test]
    fn test_identity_kernel_is_noop() {
        let patch = noise_patch(9, 7, 1);
        let blurred = BlurEngine::apply(&patch, &Psf::identity()).unwrap();
        assert!(max_abs_diff(&patch, &blurred) < 1e-6);
    }

    #[test]
    fn test_same_size_and_alpha_carried() {
        let patch = noise_patch(16, 10, 2);
        let code = CodeGenerator::generate(CodeKind::Mura, 11, None).unwrap();
        let psf = PsfBuilder::build(&code, 30.0, 2).unwrap();
        let blurred = BlurEngine::apply(&patch, &psf).unwrap();
        assert_eq!(blurred.dimensions(), (16, 10));
        assert!(blurred.has_alpha());
    }

    #[test]
    fn test_spatial_matches_frequency() {
        let patch = noise_patch(23, 17, 3);
        let code = CodeGenerator::generate(CodeKind::Optimal, 9, None).unwrap();
        for (angle, edge_mode) in [
            (0.0, EdgeMode::Replicate),
            (37.0, EdgeMode::Replicate),
            (200.0, EdgeMode::Zero),
        ] {
            let psf = PsfBuilder::build(&code, angle, 2).unwrap();
            let spatial = BlurOptions::builder()
                .edge_mode(edge_mode)
                .method(ConvolutionMethod::Spatial)
                .build();
            let frequency = BlurOptions::builder()
                .edge_mode(edge_mode)
                .method(ConvolutionMethod::Frequency)
                .build();
            let a = BlurEngine::apply_with_options(&patch, &psf, &spatial).unwrap();
            let b = BlurEngine::apply_with_options(&patch, &psf, &frequency).unwrap();
            assert!(max_abs_diff(&a, &b) < 1e-5, "angle {}", angle);
        }
    }

    #[test]
    fn test_constant_patch_stays_constant() {
        let patch = ImagePatch::filled(12, 12, [0.3, 0.6, 0.9]).unwrap();
        let code = CodeGenerator::generate(CodeKind::Box, 8, None).unwrap();
        let psf = PsfBuilder::build(&code, 60.0, 3).unwrap();
        let blurred = BlurEngine::apply(&patch, &psf).unwrap();
        for y in 0..12 {
            for x in 0..12 {
                let px = blurred.get(x, y);
                assert!((px[0] - 0.3).abs() < 1e-5);
                assert!((px[2] - 0.9).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_point_spreads_into_code_pattern() {
        let mut patch = ImagePatch::filled(15, 3, [0.0; 3]).unwrap();
        patch.set(7, 1, [1.0, 1.0, 1.0]);
        let code = CodeGenerator::generate(CodeKind::Mura, 7, None).unwrap();
        let psf = PsfBuilder::build(&code, 0.0, 1).unwrap();
        let blurred = BlurEngine::apply_with_options(&patch, &psf, &BlurOptions::zero_padded())
            .unwrap();

        // Kernel [0, 1, 1, 0, 1, 0, 0] / 3 anchored at 3 lands on x = 4..=10
        let row: Vec<f32> = (4..=10).map(|x| blurred.get(x, 1)[0]).collect();
        let third = 1.0 / 3.0;
        let expected = [0.0, third, third, 0.0, third, 0.0, 0.0];
        for (got, want) in row.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{:?}", row);
        }
        assert!(blurred.get(7, 0)[0].abs() < 1e-6);
    }

    #[test]
    fn test_blurred_alpha_softens_edges() {
        let mut patch = ImagePatch::filled(20, 5, [1.0, 0.0, 0.0])
            .unwrap()
            .with_uniform_alpha(0.0);
        for y in 0..5 {
            for x in 8..12 {
                patch.set_alpha(x, y, 1.0);
            }
        }
        let code = CodeGenerator::generate(CodeKind::Box, 5, None).unwrap();
        let psf = PsfBuilder::build(&code, 0.0, 1).unwrap();
        let blurred = BlurEngine::apply(&patch, &psf).unwrap();
        let edge = blurred.alpha_at(7, 2);
        assert!(edge > 0.0 && edge < 1.0);
        let total_before: f32 = patch.alpha().unwrap().iter().sum();
        let total_after: f32 = blurred.alpha().unwrap().iter().sum();
        assert!((total_before - total_after).abs() < 1e-3);
    }
}
