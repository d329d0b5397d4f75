//! Rectangle-to-quad homography via normalized DLT

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};

use crate::types::{ExposureError, Result};

/// Homogeneous scales below this map to infinity
const W_EPSILON: f64 = 1e-12;

/// Corner reprojection error tolerated after fitting, in pixels
const MAX_CORNER_ERROR: f64 = 1e-6;

/// Invertible map from rectified patch coordinates to image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
    size: (usize, usize),
}

impl Homography {
    /// Fit the homography taking `src[i]` to `dst[i]` for four pairs
    ///
    /// `size` is the rectified patch size the source points describe.
    pub fn from_correspondences(
        src: &[[f64; 2]; 4],
        dst: &[[f64; 2]; 4],
        size: (usize, usize),
    ) -> Result<Self> {
        let forward = solve_dlt(src, dst)?;
        let inverse = forward
            .try_inverse()
            .ok_or_else(|| ExposureError::InvalidGeometry("homography is singular".to_string()))?;

        let h = Self {
            forward,
            inverse,
            size,
        };
        for (s, d) in src.iter().zip(dst) {
            let fits = h
                .project(s[0], s[1])
                .is_some_and(|p| (p[0] - d[0]).hypot(p[1] - d[1]) <= MAX_CORNER_ERROR * scale_of(dst));
            if !fits {
                return Err(ExposureError::InvalidGeometry(
                    "homography does not reproduce the quad corners".to_string(),
                ));
            }
        }
        Ok(h)
    }

    /// Rectified `(u, v)` to image `(x, y)`
    pub fn project(&self, u: f64, v: f64) -> Option<[f64; 2]> {
        apply(&self.forward, u, v)
    }

    /// Image `(x, y)` to rectified `(u, v)`
    pub fn unproject(&self, x: f64, y: f64) -> Option<[f64; 2]> {
        apply(&self.inverse, x, y)
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.forward
    }

    /// Size of the rectified patch
    pub fn size(&self) -> (usize, usize) {
        self.size
    }
}

fn apply(m: &Matrix3<f64>, x: f64, y: f64) -> Option<[f64; 2]> {
    let p = m * Vector3::new(x, y, 1.0);
    if p[2].abs() < W_EPSILON {
        return None;
    }
    Some([p[0] / p[2], p[1] / p[2]])
}

fn scale_of(pts: &[[f64; 2]; 4]) -> f64 {
    pts.iter()
        .flatten()
        .fold(1.0f64, |acc, v| acc.max(v.abs()))
}

/// Translate the centroid to the origin and scale the mean radius to sqrt(2)
fn normalize_points(pts: &[[f64; 2]; 4]) -> (Matrix3<f64>, [[f64; 2]; 4]) {
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / 4.0;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / 4.0;
    let mean_dist = pts
        .iter()
        .map(|p| (p[0] - cx).hypot(p[1] - cy))
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    (t, pts.map(|p| [s * (p[0] - cx), s * (p[1] - cy)]))
}

fn solve_dlt(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Result<Matrix3<f64>> {
    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(8, 9);
    for i in 0..4 {
        let [sx, sy] = src_n[i];
        let [dx, dy] = dst_n[i];

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of A^T A with the smallest eigenvalue
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|x, y| x.1.abs().total_cmp(&y.1.abs()))
        .map(|(i, _)| i)
        .ok_or_else(|| ExposureError::InvalidGeometry("empty eigen decomposition".to_string()))?;
    let h = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| ExposureError::InvalidGeometry("degenerate target points".to_string()))?;
    let m = t_dst_inv * h_norm * t_src;

    let scale = m[(2, 2)];
    if scale.abs() < W_EPSILON {
        return Err(ExposureError::InvalidGeometry(
            "homography maps the patch origin to infinity".to_string(),
        ));
    }
    Ok(m / scale)
}
