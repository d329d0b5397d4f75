//! Least-squares deblur against an explicit smearing matrix
//!
//! For horizontal motion every row is an independent 1-D problem. A sharp
//! row segment `f` of `n = width - kernel_width + 1` pixels smears over the
//! whole observed row, and everything the segment does not cover is one
//! constant background level `b`:
//!
//! ```text
//! g = A f + b
//! ```
//!
//! `A` is the `width x n` full-convolution matrix of the kernel. The
//! extended system `[A | 1]` is solved once with a Tikhonov-damped SVD and
//! the pseudo-inverse is reused for every row and plane.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::psf::Psf;
use crate::types::{ExposureError, Result};

/// Regularized pseudo-inverse of `[A | 1]` for one kernel and row width
pub(crate) struct ConstantBackgroundSolver {
    width: usize,
    anchor: usize,
    segment: usize,
    pseudo_inverse: DMatrix<f64>,
}

impl ConstantBackgroundSolver {
    /// # Errors
    ///
    /// * `InvalidParameter` when the kernel is not a single row
    /// * `DimensionMismatch` when the kernel is wider than the row
    pub fn new(psf: &Psf, width: usize, lambda: f64) -> Result<Self> {
        if psf.height() != 1 {
            return Err(ExposureError::InvalidParameter(format!(
                "constant-background deblur needs horizontal motion, got a {}x{} kernel; rectify the region first",
                psf.width(),
                psf.height()
            )));
        }
        if psf.width() > width {
            return Err(ExposureError::DimensionMismatch {
                expected: format!("rows of at least {} pixels", psf.width()),
                actual: format!("{} pixels", width),
            });
        }

        let segment = width - psf.width() + 1;
        let kernel = psf.weights();
        let system = DMatrix::from_fn(width, segment + 1, |row, col| {
            if col == segment {
                1.0
            } else if row >= col && row - col < kernel.len() {
                kernel[row - col]
            } else {
                0.0
            }
        });

        let svd = system.svd(true, true);
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => {
                return Err(ExposureError::InvalidParameter(
                    "smearing matrix decomposition failed".to_string(),
                ))
            }
        };
        let mut v = v_t.transpose();
        for (j, s) in svd.singular_values.iter().enumerate() {
            v.column_mut(j).scale_mut(s / (s * s + lambda));
        }
        debug!(
            width,
            segment,
            largest = svd.singular_values.max(),
            smallest = svd.singular_values.min(),
            "built smearing pseudo-inverse"
        );

        Ok(Self {
            width,
            anchor: psf.anchor().0,
            segment,
            pseudo_inverse: v * u.transpose(),
        })
    }

    /// Solve every row of a row-major plane
    pub fn apply(&self, plane: &[f32]) -> Vec<f32> {
        plane
            .chunks_exact(self.width)
            .flat_map(|row| self.solve_row(row))
            .collect()
    }

    /// Background level outside the sharp segment, segment pixels on top of it
    fn solve_row(&self, row: &[f32]) -> Vec<f32> {
        let observed = DVector::from_iterator(self.width, row.iter().map(|&v| v as f64));
        let solution = &self.pseudo_inverse * observed;
        let background = solution[self.segment];
        (0..self.width)
            .map(|x| {
                let value = match x.checked_sub(self.anchor) {
                    Some(i) if i < self.segment => background + solution[i],
                    _ => background,
                };
                value as f32
            })
            .collect()
    }

    /// Number of sharp pixels solved per row
    pub fn segment(&self) -> usize {
        self.segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blur::BlurEngine;
    use crate::code::{CodeGenerator, CodeKind};
    use crate::patch::ImagePatch;
    use crate::psf::PsfBuilder;

    fn object_on_flat_row(width: usize, level: f32) -> Vec<f32> {
        let mut row = vec![level; width];
        for (i, v) in row.iter_mut().enumerate().take(26).skip(12) {
            *v = ((i * 37) % 11) as f32 / 10.0;
        }
        row
    }

    #[test]
    fn test_recovers_object_and_background() {
        let code = CodeGenerator::generate(CodeKind::Mura, 7, None).unwrap();
        let psf = PsfBuilder::build(&code, 0.0, 1).unwrap();
        let sharp_row = object_on_flat_row(40, 0.3);
        let sharp = ImagePatch::from_planes(
            40,
            1,
            [sharp_row.clone(), sharp_row.clone(), sharp_row.clone()],
            None,
        )
        .unwrap();
        let blurred = BlurEngine::apply(&sharp, &psf).unwrap();

        let solver = ConstantBackgroundSolver::new(&psf, 40, 1e-6).unwrap();
        assert_eq!(solver.segment(), 34);
        let restored = solver.apply(blurred.channel(0));
        for (x, (r, s)) in restored.iter().zip(&sharp_row).enumerate() {
            assert!((r - s).abs() < 1e-3, "x {}: {} vs {}", x, r, s);
        }
    }

    #[test]
    fn test_rows_are_independent() {
        let code = CodeGenerator::generate(CodeKind::Box, 3, None).unwrap();
        let psf = PsfBuilder::build(&code, 0.0, 1).unwrap();
        let solver = ConstantBackgroundSolver::new(&psf, 8, 1e-4).unwrap();
        let mut plane = vec![0.2f32; 8];
        plane.extend(vec![0.7f32; 8]);
        let out = solver.apply(&plane);
        assert_eq!(out.len(), 16);
        assert!(out[..8].iter().all(|v| (v - 0.2).abs() < 1e-3));
        assert!(out[8..].iter().all(|v| (v - 0.7).abs() < 1e-3));
    }

    #[test]
    fn test_rejects_vertical_kernel() {
        let code = CodeGenerator::generate(CodeKind::Box, 5, None).unwrap();
        let psf = PsfBuilder::build(&code, 90.0, 1).unwrap();
        assert!(matches!(
            ConstantBackgroundSolver::new(&psf, 20, 1e-3),
            Err(ExposureError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_rejects_kernel_wider_than_row() {
        let code = CodeGenerator::generate(CodeKind::Box, 9, None).unwrap();
        let psf = PsfBuilder::build(&code, 0.0, 1).unwrap();
        assert!(matches!(
            ConstantBackgroundSolver::new(&psf, 6, 1e-3),
            Err(ExposureError::DimensionMismatch { .. })
        ));
    }
}
