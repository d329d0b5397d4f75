//! Alpha compositing of a foreground patch onto a background
//!
//! `out = bg * (1 - a) + fg * a` over the region covered by the placed
//! foreground, where `a` is the foreground alpha clamped to `[0, 1]`
//! (1 everywhere when the foreground has no mask). Pixels outside the placed
//! extent are copied from the background unchanged. When the background has
//! its own mask the output mask follows the "over" operator.

use tracing::debug;

use crate::patch::ImagePatch;

/// Places foreground patches onto backgrounds
pub struct Compositor;

impl Compositor {
    /// Blend `foreground` onto a copy of `background` with its top-left
    /// corner at `offset`; the part falling outside the background is clipped
    pub fn place(background: &ImagePatch, foreground: &ImagePatch, offset: (i64, i64)) -> ImagePatch {
        let mut out = background.clone();
        let (bw, bh) = (background.width() as i64, background.height() as i64);
        let (fw, fh) = (foreground.width() as i64, foreground.height() as i64);

        let x0 = offset.0.max(0);
        let y0 = offset.1.max(0);
        let x1 = offset.0.saturating_add(fw).min(bw);
        let y1 = offset.1.saturating_add(fh).min(bh);
        if x0 >= x1 || y0 >= y1 {
            debug!(?offset, "foreground placed entirely outside background");
            return out;
        }

        for y in y0..y1 {
            for x in x0..x1 {
                let (bx, by) = (x as usize, y as usize);
                let (fx, fy) = ((x - offset.0) as usize, (y - offset.1) as usize);
                let a = foreground.alpha_at(fx, fy).clamp(0.0, 1.0);
                if a == 0.0 {
                    continue;
                }
                let bg = background.get(bx, by);
                let fg = foreground.get(fx, fy);
                let blended = [
                    bg[0] * (1.0 - a) + fg[0] * a,
                    bg[1] * (1.0 - a) + fg[1] * a,
                    bg[2] * (1.0 - a) + fg[2] * a,
                ];
                out.set(bx, by, blended);
                if background.has_alpha() {
                    let under = background.alpha_at(bx, by);
                    out.set_alpha(bx, by, a + under * (1.0 - a));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(w: usize, h: usize) -> ImagePatch {
        let mut p = ImagePatch::filled(w, h, [0.0; 3]).unwrap();
        for y in 0..h {
            for x in 0..w {
                p.set(x, y, [x as f32 / w as f32, y as f32 / h as f32, 0.25]);
            }
        }
        p
    }

    #[test]
    fn test_zero_alpha_leaves_background() {
        let bg = gradient(10, 8);
        let fg = ImagePatch::filled(4, 4, [1.0, 0.0, 1.0])
            .unwrap()
            .with_uniform_alpha(0.0);
        let out = Compositor::place(&bg, &fg, (3, 2));
        assert_eq!(out, bg);
    }

    #[test]
    fn test_opaque_foreground_replaces_region() {
        let bg = gradient(10, 8);
        let fg = ImagePatch::filled(4, 3, [1.0, 0.0, 1.0]).unwrap();
        let out = Compositor::place(&bg, &fg, (3, 2));
        for y in 0..8 {
            for x in 0..10 {
                let inside = (3..7).contains(&x) && (2..5).contains(&y);
                if inside {
                    assert_eq!(out.get(x, y), [1.0, 0.0, 1.0]);
                } else {
                    assert_eq!(out.get(x, y), bg.get(x, y));
                }
            }
        }
    }

    #[test]
    fn test_partial_alpha_blends() {
        let bg = ImagePatch::filled(2, 2, [0.0; 3]).unwrap();
        let fg = ImagePatch::filled(1, 1, [1.0; 3]).unwrap().with_uniform_alpha(0.25);
        let out = Compositor::place(&bg, &fg, (1, 1));
        assert!((out.get(1, 1)[0] - 0.25).abs() < 1e-6);
        assert_eq!(out.get(0, 0), [0.0; 3]);
    }

    #[test]
    fn test_clips_negative_and_overhanging_offsets() {
        let bg = gradient(6, 6);
        let fg = ImagePatch::filled(4, 4, [1.0; 3]).unwrap();

        let out = Compositor::place(&bg, &fg, (-2, -3));
        assert_eq!(out.get(1, 0), [1.0; 3]);
        assert_eq!(out.get(2, 0), bg.get(2, 0));
        assert_eq!(out.get(0, 1), bg.get(0, 1));

        let out = Compositor::place(&bg, &fg, (4, 5));
        assert_eq!(out.get(5, 5), [1.0; 3]);
        assert_eq!(out.get(3, 5), bg.get(3, 5));

        let out = Compositor::place(&bg, &fg, (10, 10));
        assert_eq!(out, bg);
    }

    #[test]
    fn test_out_of_range_alpha_is_clamped() {
        let bg = ImagePatch::filled(1, 1, [0.5; 3]).unwrap();
        let fg = ImagePatch::filled(1, 1, [1.0; 3]).unwrap().with_uniform_alpha(1.3);
        let out = Compositor::place(&bg, &fg, (0, 0));
        assert_eq!(out.get(0, 0), [1.0; 3]);
    }

    #[test]
    fn test_background_alpha_uses_over() {
        let bg = ImagePatch::filled(1, 1, [0.0; 3]).unwrap().with_uniform_alpha(0.5);
        let fg = ImagePatch::filled(1, 1, [1.0; 3]).unwrap().with_uniform_alpha(0.5);
        let out = Compositor::place(&bg, &fg, (0, 0));
        assert!((out.alpha_at(0, 0) - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_extreme_offsets_leave_background() {
        let bg = gradient(6, 6);
        let fg = ImagePatch::filled(4, 4, [1.0; 3]).unwrap();
        for offset in [(i64::MAX, 0), (0, i64::MAX), (i64::MIN, 0), (i64::MIN, i64::MIN), (i64::MAX, i64::MIN)] {
            assert_eq!(Compositor::place(&bg, &fg, offset), bg, "offset {:?}", offset);
        }
    }
}
