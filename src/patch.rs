//! Image patch container
//!
//! An [`ImagePatch`] is a planar, floating point RGB buffer with an optional
//! alpha mask of identical size. Values are nominally in `[0, 1]`; pipeline
//! stages never clamp, only the 8-bit conversions do.
//!
//! Every stage consumes `&ImagePatch` and returns a fresh patch, so patches
//! never alias each other's memory.

use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use rayon::prelude::*;
use std::path::Path;

use crate::types::{ExposureError, Result};

/// Number of color channels in a patch
pub const COLOR_CHANNELS: usize = 3;

/// Planar RGB image with an optional alpha mask
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePatch {
    width: usize,
    height: usize,
    color: [Vec<f32>; COLOR_CHANNELS],
    alpha: Option<Vec<f32>>,
}

impl ImagePatch {
    /// Create a patch filled with a single color and no alpha mask
    pub fn filled(width: usize, height: usize, rgb: [f32; 3]) -> Result<Self> {
        check_extent(width, height)?;
        let len = width * height;
        Ok(Self {
            width,
            height,
            color: [vec![rgb[0]; len], vec![rgb[1]; len], vec![rgb[2]; len]],
            alpha: None,
        })
    }

    /// Build a patch from existing planes
    pub fn from_planes(
        width: usize,
        height: usize,
        color: [Vec<f32>; COLOR_CHANNELS],
        alpha: Option<Vec<f32>>,
    ) -> Result<Self> {
        check_extent(width, height)?;
        let len = width * height;
        for plane in color.iter().chain(alpha.iter()) {
            if plane.len() != len {
                return Err(ExposureError::DimensionMismatch {
                    expected: format!("{} samples ({}x{})", len, width, height),
                    actual: format!("{} samples", plane.len()),
                });
            }
        }
        Ok(Self {
            width,
            height,
            color,
            alpha,
        })
    }

    /// Attach (or replace) the alpha mask
    pub fn with_alpha(self, alpha: Vec<f32>) -> Result<Self> {
        let [r, g, b] = self.color;
        Self::from_planes(self.width, self.height, [r, g, b], Some(alpha))
    }

    /// Attach a constant alpha mask
    pub fn with_uniform_alpha(self, value: f32) -> Self {
        let len = self.width * self.height;
        Self {
            alpha: Some(vec![value; len]),
            ..self
        }
    }

    /// Drop the alpha mask
    pub fn without_alpha(self) -> Self {
        Self {
            alpha: None,
            ..self
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

    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }

    /// Color plane `c` (0 = red, 1 = green, 2 = blue), row-major
    pub fn channel(&self, c: usize) -> &[f32] {
        &self.color[c]
    }

    pub fn alpha(&self) -> Option<&[f32]> {
        self.alpha.as_deref()
    }

    /// RGB value at `(x, y)`
    pub fn get(&self, x: usize, y: usize) -> [f32; 3] {
        let i = y * self.width + x;
        [self.color[0][i], self.color[1][i], self.color[2][i]]
    }

    /// Alpha at `(x, y)`; a patch without a mask is fully opaque
    pub fn alpha_at(&self, x: usize, y: usize) -> f32 {
        self.alpha
            .as_ref()
            .map_or(1.0, |a| a[y * self.width + x])
    }

    /// Set the RGB value at `(x, y)`
    pub fn set(&mut self, x: usize, y: usize, rgb: [f32; 3]) {
        let i = y * self.width + x;
        for (plane, v) in self.color.iter_mut().zip(rgb) {
            plane[i] = v;
        }
    }

    /// Set the alpha at `(x, y)`, creating an opaque mask first if needed
    pub fn set_alpha(&mut self, x: usize, y: usize, value: f32) {
        let len = self.width * self.height;
        let width = self.width;
        let alpha = self.alpha.get_or_insert_with(|| vec![1.0; len]);
        alpha[y * width + x] = value;
    }

    /// Copy out a rectangular region
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> Result<Self> {
        check_extent(width, height)?;
        if x + width > self.width || y + height > self.height {
            return Err(ExposureError::InvalidParameter(format!(
                "crop {}x{}+{}+{} exceeds patch {}x{}",
                width, height, x, y, self.width, self.height
            )));
        }
        let cut = |plane: &[f32]| -> Vec<f32> {
            (y..y + height)
                .flat_map(|row| {
                    let start = row * self.width + x;
                    plane[start..start + width].iter().copied()
                })
                .collect()
        };
        let [r, g, b] = &self.color;
        Ok(Self {
            width,
            height,
            color: [cut(r.as_slice()), cut(g.as_slice()), cut(b.as_slice())],
            alpha: self.alpha.as_deref().map(cut),
        })
    }

    /// Apply `f` to every plane (color and alpha) independently and
    /// collect the results into a new patch of the same size.
    ///
    /// Planes are data-independent, so they are processed in parallel.
    pub(crate) fn map_planes<F>(&self, f: F) -> Result<Self>
    where
        F: Fn(&[f32]) -> Result<Vec<f32>> + Sync,
    {
        let mut planes: Vec<&[f32]> = self.color.iter().map(Vec::as_slice).collect();
        if let Some(alpha) = &self.alpha {
            planes.push(alpha);
        }

        let mut mapped = planes
            .par_iter()
            .map(|plane| f(plane))
            .collect::<Result<Vec<_>>>()?;

        let alpha = if self.alpha.is_some() { mapped.pop() } else { None };
        let b = mapped.pop();
        let g = mapped.pop();
        let r = mapped.pop();
        match (r, g, b) {
            (Some(r), Some(g), Some(b)) => Self::from_planes(self.width, self.height, [r, g, b], alpha),
            _ => Err(ExposureError::InvalidParameter(
                "plane mapping lost a color channel".to_string(),
            )),
        }
    }

    // ============================================================
    // Conversions
    // ============================================================

    /// Convert an 8-bit RGB image (no alpha)
    pub fn from_rgb8(img: &RgbImage) -> Result<Self> {
        let (w, h) = img.dimensions();
        check_extent(w as usize, h as usize)?;
        let len = (w * h) as usize;
        let mut color = [vec![0.0; len], vec![0.0; len], vec![0.0; len]];
        for (i, px) in img.pixels().enumerate() {
            for c in 0..COLOR_CHANNELS {
                color[c][i] = px.0[c] as f32 / 255.0;
            }
        }
        Ok(Self {
            width: w as usize,
            height: h as usize,
            color,
            alpha: None,
        })
    }

    /// Convert an 8-bit RGBA image; the fourth channel becomes the alpha mask
    pub fn from_rgba8(img: &RgbaImage) -> Result<Self> {
        let (w, h) = img.dimensions();
        check_extent(w as usize, h as usize)?;
        let len = (w * h) as usize;
        let mut color = [vec![0.0; len], vec![0.0; len], vec![0.0; len]];
        let mut alpha = vec![0.0; len];
        for (i, px) in img.pixels().enumerate() {
            for c in 0..COLOR_CHANNELS {
                color[c][i] = px.0[c] as f32 / 255.0;
            }
            alpha[i] = px.0[3] as f32 / 255.0;
        }
        Ok(Self {
            width: w as usize,
            height: h as usize,
            color,
            alpha: Some(alpha),
        })
    }

    /// Convert any decoded image, keeping alpha when the source has it
    pub fn from_dynamic(img: &DynamicImage) -> Result<Self> {
        if img.color().has_alpha() {
            Self::from_rgba8(&img.to_rgba8())
        } else {
            Self::from_rgb8(&img.to_rgb8())
        }
    }

    /// Load an image file
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ExposureError::ImageNotFound(path.to_path_buf()));
        }
        let img = image::open(path)?;
        Self::from_dynamic(&img)
    }

    /// Save to an image file; the format follows the extension.
    ///
    /// Patches with an alpha mask are written as RGBA.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        if self.has_alpha() {
            self.to_rgba8().save(path)?;
        } else {
            self.to_rgb8().save(path)?;
        }
        Ok(())
    }

    /// Quantize to 8-bit RGB, clamping out-of-range values
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let [r, g, b] = self.get(x as usize, y as usize);
            Rgb([to_u8(r), to_u8(g), to_u8(b)])
        })
    }

    /// Quantize to 8-bit RGBA; a patch without a mask is written opaque
    pub fn to_rgba8(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = self.get(x, y);
            Rgba([to_u8(r), to_u8(g), to_u8(b), to_u8(self.alpha_at(x, y))])
        })
    }
}

fn check_extent(width: usize, height: usize) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(ExposureError::InvalidParameter(format!(
            "patch must be at least 1x1, got {}x{}",
            width, height
        )));
    }
    Ok(())
}

fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filled_patch() {
        let patch = ImagePatch::filled(4, 3, [0.1, 0.2, 0.3]).unwrap();
        assert_eq!(patch.dimensions(), (4, 3));
        assert!(!patch.has_alpha());
        assert_eq!(patch.get(3, 2), [0.1, 0.2, 0.3]);
        assert_eq!(patch.alpha_at(0, 0), 1.0);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let result = ImagePatch::filled(0, 3, [0.0; 3]);
        assert!(matches!(result, Err(ExposureError::InvalidParameter(_))));
    }

    #[test]
    fn test_alpha_size_mismatch() {
        let patch = ImagePatch::filled(4, 4, [0.0; 3]).unwrap();
        let result = patch.with_alpha(vec![1.0; 15]);
        assert!(matches!(result, Err(ExposureError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_crop() {
        let mut patch = ImagePatch::filled(5, 5, [0.0; 3]).unwrap();
        patch.set(2, 3, [1.0, 0.5, 0.25]);
        let cropped = patch.crop(1, 2, 3, 2).unwrap();
        assert_eq!(cropped.dimensions(), (3, 2));
        assert_eq!(cropped.get(1, 1), [1.0, 0.5, 0.25]);

        assert!(patch.crop(3, 3, 3, 3).is_err());
    }

    #[test]
    fn test_rgba_conversion() {
        let img = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 51, 128]));
        let patch = ImagePatch::from_rgba8(&img).unwrap();
        assert!(patch.has_alpha());
        assert!((patch.get(0, 0)[2] - 0.2).abs() < 1e-6);
        assert!((patch.alpha_at(1, 1) - 128.0 / 255.0).abs() < 1e-6);

        let back = patch.to_rgba8();
        assert_eq!(back.get_pixel(1, 0), &Rgba([255, 0, 51, 128]));
    }

    #[test]
    fn test_empty_decoded_image_rejected() {
        assert!(matches!(
            ImagePatch::from_rgb8(&RgbImage::new(0, 0)),
            Err(ExposureError::InvalidParameter(_))
        ));
        assert!(matches!(
            ImagePatch::from_rgba8(&RgbaImage::new(3, 0)),
            Err(ExposureError::InvalidParameter(_))
        ));
        let empty = DynamicImage::ImageRgba8(RgbaImage::new(0, 5));
        assert!(ImagePatch::from_dynamic(&empty).is_err());
    }

    #[test]
    fn test_to_rgb8_clamps() {
        let patch = ImagePatch::filled(1, 1, [-0.5, 0.5, 1.5]).unwrap();
        let img = patch.to_rgb8();
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 128, 255]));
    }

    #[test]
    fn test_map_planes_keeps_alpha() {
        let patch = ImagePatch::filled(2, 2, [0.5; 3])
            .unwrap()
            .with_uniform_alpha(0.25);
        let doubled = patch
            .map_planes(|p| Ok(p.iter().map(|v| v * 2.0).collect()))
            .unwrap();
        assert_eq!(doubled.get(1, 1), [1.0; 3]);
        assert_eq!(doubled.alpha_at(0, 1), 0.5);
    }

    #[test]
    fn test_set_alpha_creates_mask() {
        let mut patch = ImagePatch::filled(2, 1, [0.0; 3]).unwrap();
        patch.set_alpha(1, 0, 0.0);
        assert_eq!(patch.alpha_at(0, 0), 1.0);
        assert_eq!(patch.alpha_at(1, 0), 0.0);
    }
}
