//! Motion quadrilateral picked in the source image

use serde::{Deserialize, Serialize};

use crate::types::{ExposureError, Result};

/// Areas at or below this are treated as degenerate
const MIN_AREA: f64 = 1e-9;

/// Four corners of the motion region in image coordinates
///
/// Corners are ordered top-left, top-right, bottom-right, bottom-left of the
/// rectified frame, so the first edge runs along the direction of motion.
/// Pixel centers sit at integer coordinates; a quad that exactly covers the
/// pixels `0..w` x `0..h` has corners at `-0.5` and `w - 0.5` / `h - 0.5`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionQuad {
    points: [[f64; 2]; 4],
}

impl MotionQuad {
    /// Validate and wrap four corners
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` for non-finite coordinates, zero area or
    /// self-intersecting edges.
    pub fn new(points: [[f64; 2]; 4]) -> Result<Self> {
        if points.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ExposureError::InvalidGeometry(
                "quad corners must be finite".to_string(),
            ));
        }
        let quad = Self { points };
        if quad.signed_area().abs() <= MIN_AREA {
            return Err(ExposureError::InvalidGeometry(format!(
                "quad {:?} has zero area",
                points
            )));
        }
        if segments_cross(points[0], points[1], points[2], points[3])
            || segments_cross(points[1], points[2], points[3], points[0])
        {
            return Err(ExposureError::InvalidGeometry(format!(
                "quad {:?} is self-intersecting",
                points
            )));
        }
        Ok(quad)
    }

    /// Axis-aligned quad exactly covering a `width x height` pixel block at `(x, y)`
    pub fn from_rect(x: f64, y: f64, width: f64, height: f64) -> Result<Self> {
        Self::new([
            [x - 0.5, y - 0.5],
            [x + width - 0.5, y - 0.5],
            [x + width - 0.5, y + height - 0.5],
            [x - 0.5, y + height - 0.5],
        ])
    }

    pub fn points(&self) -> &[[f64; 2]; 4] {
        &self.points
    }

    /// Shoelace area, positive for clockwise corners in image coordinates
    pub fn signed_area(&self) -> f64 {
        let p = &self.points;
        (0..4)
            .map(|i| {
                let (a, b) = (p[i], p[(i + 1) % 4]);
                a[0] * b[1] - b[0] * a[1]
            })
            .sum::<f64>()
            / 2.0
    }

    /// True when every turn has the same orientation
    pub fn is_convex(&self) -> bool {
        let p = &self.points;
        let turns: Vec<f64> = (0..4)
            .map(|i| cross(p[i], p[(i + 1) % 4], p[(i + 2) % 4]))
            .collect();
        turns.iter().all(|&t| t > 0.0) || turns.iter().all(|&t| t < 0.0)
    }

    /// Direction of the first edge in degrees, in `[0, 360)`
    ///
    /// Uses the same convention as the PSF angle: 0° points right and 90°
    /// points down.
    pub fn motion_angle(&self) -> f64 {
        let [a, b] = [self.points[0], self.points[1]];
        (b[1] - a[1]).atan2(b[0] - a[0]).to_degrees().rem_euclid(360.0)
    }

    /// Size of the rectified patch: averages of opposite edge lengths,
    /// rounded, at least 1
    pub fn canonical_size(&self) -> (usize, usize) {
        let p = &self.points;
        let width = (distance(p[0], p[1]) + distance(p[3], p[2])) / 2.0;
        let height = (distance(p[1], p[2]) + distance(p[0], p[3])) / 2.0;
        (
            (width.round() as usize).max(1),
            (height.round() as usize).max(1),
        )
    }
}

fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    (b[0] - a[0]).hypot(b[1] - a[1])
}

/// z component of `(b - a) x (c - b)`
fn cross(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - b[1]) - (b[1] - a[1]) * (c[0] - b[0])
}

/// Proper intersection of segments `p1p2` and `p3p4`
fn segments_cross(p1: [f64; 2], p2: [f64; 2], p3: [f64; 2], p4: [f64; 2]) -> bool {
    let orient = |a: [f64; 2], b: [f64; 2], c: [f64; 2]| {
        (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
    };
    let d1 = orient(p3, p4, p1);
    let d2 = orient(p3, p4, p2);
    let d3 = orient(p1, p2, p3);
    let d4 = orient(p1, p2, p4);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}
