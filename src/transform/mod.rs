//! Motion path rectification
//!
//! The motion region picked in the image is a quadrilateral whose first edge
//! follows the direction of travel. [`MotionPathTransform::estimate`] fits a
//! homography from a canonical `w x h` patch onto that quad, so blur and
//! deblur can run in an axis-aligned frame where motion is along +x.
//!
//! Rectified pixel `(u, v)` has its center at `(u, v)` and its extent from
//! `u - 0.5` to `u + 0.5`; the patch corners `(-0.5, -0.5)` and
//! `(w - 0.5, h - 0.5)` map onto the quad corners.

mod homography;
mod quad;

pub use homography::Homography;
pub use quad::MotionQuad;

use tracing::debug;

use crate::patch::ImagePatch;
use crate::types::{ExposureError, Result};

/// Maps motion quads to and from rectified patches
pub struct MotionPathTransform;

impl MotionPathTransform {
    /// Fit the homography for a validated quad
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` when the quad is not convex or no invertible
    /// homography reproduces its corners.
    pub fn estimate(quad: &MotionQuad) -> Result<Homography> {
        if !quad.is_convex() {
            return Err(ExposureError::InvalidGeometry(
                "motion quad must be convex to be rectified".to_string(),
            ));
        }
        let (w, h) = quad.canonical_size();
        let (wf, hf) = (w as f64, h as f64);
        let rect = [
            [-0.5, -0.5],
            [wf - 0.5, -0.5],
            [wf - 0.5, hf - 0.5],
            [-0.5, hf - 0.5],
        ];
        let homography = Homography::from_correspondences(&rect, quad.points(), (w, h))?;
        debug!(
            width = w,
            height = h,
            angle = quad.motion_angle(),
            "estimated motion homography"
        );
        Ok(homography)
    }

    /// Resample the quad region of `image` into the canonical patch
    ///
    /// Samples falling outside `image` repeat its border. The alpha mask is
    /// resampled only when `image` carries one.
    pub fn rectify(image: &ImagePatch, homography: &Homography) -> Result<ImagePatch> {
        let (w, h) = homography.size();
        let (iw, ih) = image.dimensions();
        let len = w * h;
        let mut color = [vec![0.0f32; len], vec![0.0f32; len], vec![0.0f32; len]];
        let mut alpha = image.alpha().map(|_| vec![0.0f32; len]);

        for v in 0..h {
            for u in 0..w {
                let i = v * w + u;
                let Some([x, y]) = homography.project(u as f64, v as f64) else {
                    continue;
                };
                for (c, plane) in color.iter_mut().enumerate() {
                    plane[i] = bilinear(image.channel(c), iw, ih, x, y);
                }
                if let (Some(out), Some(src)) = (alpha.as_mut(), image.alpha()) {
                    out[i] = bilinear(src, iw, ih, x, y);
                }
            }
        }
        ImagePatch::from_planes(w, h, color, alpha)
    }

    /// Warp a rectified patch back into an image of `target_size`
    ///
    /// The result's alpha is the coverage of the quad (times the patch's own
    /// alpha), so it can be handed straight to the compositor.
    pub fn unrectify(
        patch: &ImagePatch,
        homography: &Homography,
        target_size: (usize, usize),
    ) -> Result<ImagePatch> {
        if patch.dimensions() != homography.size() {
            return Err(ExposureError::size_mismatch(homography.size(), patch.dimensions()));
        }
        let (pw, ph) = patch.dimensions();
        let (tw, th) = target_size;
        let mut out = ImagePatch::filled(tw, th, [0.0; 3])?.with_uniform_alpha(0.0);
        let (max_u, max_v) = (pw as f64 - 0.5, ph as f64 - 0.5);

        for y in 0..th {
            for x in 0..tw {
                let Some([u, v]) = homography.unproject(x as f64, y as f64) else {
                    continue;
                };
                if u < -0.5 || v < -0.5 || u > max_u || v > max_v {
                    continue;
                }
                let rgb = [0, 1, 2].map(|c| bilinear(patch.channel(c), pw, ph, u, v));
                out.set(x, y, rgb);
                let coverage = patch.alpha().map_or(1.0, |a| bilinear(a, pw, ph, u, v));
                out.set_alpha(x, y, coverage);
            }
        }
        Ok(out)
    }
}

/// Bilinear sample with clamp-to-edge
fn bilinear(plane: &[f32], width: usize, height: usize, x: f64, y: f64) -> f32 {
    let x = x.clamp(0.0, (width - 1) as f64);
    let y = y.clamp(0.0, (height - 1) as f64);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let at = |xx: usize, yy: usize| plane[yy * width + xx];
    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}
