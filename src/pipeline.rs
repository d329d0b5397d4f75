//! End-to-end blur and deblur runs
//!
//! Each run regenerates the code and PSF from the current configuration,
//! so nothing is memoized between runs and a changed parameter always takes
//! effect on the next call.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

use crate::blur::{BlurEngine, BlurOptions};
use crate::code::{CodeGenerator, CodeKind, ExposureCode};
use crate::composite::Compositor;
use crate::deblur::{DeblurEngine, DeblurMethod, DeblurParameters, DEFAULT_LAMBDA, DEFAULT_PASSES};
use crate::fft::{EdgeMode, Padding};
use crate::metrics;
use crate::patch::ImagePatch;
use crate::progress::ProcessingStage;
use crate::psf::{Psf, PsfBuilder};
use crate::transform::{MotionPathTransform, MotionQuad};
use crate::types::Result;

/// Default blur length in pixels
pub const DEFAULT_CODE_LENGTH: usize = 52;

/// Default subpixel sampling factor
pub const DEFAULT_SUBPIXEL: usize = 4;

// ============================================================
// Progress
// ============================================================

/// Receives stage notifications from a pipeline run
pub trait ProgressCallback: Send + Sync {
    fn on_step_start(&self, _step: &str) {}
    fn on_step_progress(&self, _current: usize, _total: usize) {}
    fn on_step_complete(&self, _step: &str, _message: &str) {}
    fn on_debug(&self, _message: &str) {}
}

/// Progress sink that ignores everything
pub struct SilentProgress;

impl ProgressCallback for SilentProgress {}

// ============================================================
// Configuration
// ============================================================

/// Fully resolved parameters for blur and deblur runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub code_kind: CodeKind,
    pub code_length: usize,
    /// Motion angle in degrees
    pub angle: f64,
    pub subpixel: usize,
    pub seed: Option<u64>,
    /// Travel in pixels when it differs from the code length
    #[serde(default)]
    pub blur_length: Option<usize>,
    pub blur_edge_mode: EdgeMode,
    pub lambda: f64,
    pub passes: usize,
    pub deblur_edge_mode: EdgeMode,
    #[serde(default)]
    pub deblur_method: DeblurMethod,
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            code_kind: CodeKind::default(),
            code_length: DEFAULT_CODE_LENGTH,
            angle: 0.0,
            subpixel: DEFAULT_SUBPIXEL,
            seed: None,
            blur_length: None,
            blur_edge_mode: EdgeMode::default(),
            lambda: DEFAULT_LAMBDA,
            passes: DEFAULT_PASSES,
            deblur_edge_mode: EdgeMode::default(),
            deblur_method: DeblurMethod::default(),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl PipelineConfig {
    pub fn blur_options(&self) -> BlurOptions {
        BlurOptions::builder().edge_mode(self.blur_edge_mode).build()
    }

    pub fn deblur_parameters(&self) -> DeblurParameters {
        DeblurParameters::builder()
            .lambda(self.lambda)
            .passes(self.passes)
            .edge_mode(self.deblur_edge_mode)
            .method(self.deblur_method)
            .build()
    }

    /// Generate the exposure code these settings describe
    pub fn exposure_code(&self) -> Result<ExposureCode> {
        CodeGenerator::generate(self.code_kind, self.code_length, self.seed)
    }

    /// Kernel for `code` along `angle`, stretched to `blur_length` when set
    pub fn build_psf(&self, code: &ExposureCode, angle: f64) -> Result<Psf> {
        match self.blur_length {
            Some(length) => PsfBuilder::build_with_length(code, angle, self.subpixel, length),
            None => PsfBuilder::build(code, angle, self.subpixel),
        }
    }

    /// Pretty JSON of the parameters
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Short hex digest identifying the parameter set (output directory excluded)
    pub fn fingerprint(&self) -> Result<String> {
        let key = Self {
            output_dir: PathBuf::new(),
            ..self.clone()
        };
        let json = serde_json::to_string(&key)?;
        let digest = Sha256::digest(json.as_bytes());
        Ok(digest.iter().take(8).map(|b| format!("{:02x}", b)).collect())
    }
}

// ============================================================
// Blur pipeline
// ============================================================

/// Output of a blur run
#[derive(Debug, Clone)]
pub struct BlurResult {
    pub code: ExposureCode,
    pub psf: Psf,
    /// Blurred foreground on a transparent canvas grown by the kernel
    /// extent on every side, alpha included
    pub blurred: ImagePatch,
    /// Blurred foreground placed on the background
    pub composite: ImagePatch,
    /// Kernel center of mass relative to its anchor, in pixels
    pub blur_offset: (f64, f64),
    pub elapsed_seconds: f64,
}

/// Code generation, PSF, blur and compositing in one call
pub struct BlurPipeline {
    config: PipelineConfig,
}

impl BlurPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Blur `foreground` and place it on `background` at `offset`
    ///
    /// `offset` is where the sharp foreground's top-left corner would sit.
    /// The smear may extend past the foreground on any side and is kept.
    pub fn run(
        &self,
        foreground: &ImagePatch,
        background: &ImagePatch,
        offset: (i64, i64),
        progress: &dyn ProgressCallback,
    ) -> Result<BlurResult> {
        let start = Instant::now();
        let cfg = &self.config;

        progress.on_step_start(ProcessingStage::GeneratingCode.name());
        let code = cfg.exposure_code()?;
        progress.on_step_complete("Code", &format!("{} ({})", code, cfg.code_kind));

        progress.on_step_start(ProcessingStage::BuildingPsf.name());
        let psf = cfg.build_psf(&code, cfg.angle)?;
        let blur_offset = psf.centroid();
        progress.on_step_complete(
            "PSF",
            &format!("{}x{} kernel, anchor {:?}", psf.width(), psf.height(), psf.anchor()),
        );
        progress.on_debug(&format!(
            "blur offset ({:.2}, {:.2})",
            blur_offset.0, blur_offset.1
        ));

        progress.on_step_start(ProcessingStage::Blurring.name());
        let margin = Padding::for_kernel(&psf);
        let blurred = blur_on_canvas(foreground, &psf, margin, &cfg.blur_options())?;
        progress.on_step_complete("Blur", &format!("{}x{}", blurred.width(), blurred.height()));

        progress.on_step_start(ProcessingStage::Compositing.name());
        let placed_at = (
            offset.0.saturating_sub(margin.left as i64),
            offset.1.saturating_sub(margin.top as i64),
        );
        let composite = Compositor::place(background, &blurred, placed_at);
        progress.on_step_complete("Composite", &format!("offset {:?}", placed_at));

        let elapsed_seconds = start.elapsed().as_secs_f64();
        info!(
            kind = %cfg.code_kind,
            length = cfg.code_length,
            angle = cfg.angle,
            elapsed_seconds,
            "blur pipeline finished"
        );

        Ok(BlurResult {
            code,
            psf,
            blurred,
            composite,
            blur_offset,
            elapsed_seconds,
        })
    }
}

/// Alpha below which a blurred pixel's color is treated as undefined
const MIN_COVERAGE: f32 = 0.001;

/// Blur `foreground` on a transparent canvas grown by `margin`
///
/// Color is blurred premultiplied by alpha (a foreground without a mask is
/// opaque) and divided back afterwards, so transparent surroundings do not
/// darken the smear. Pixels with almost no coverage get black color.
fn blur_on_canvas(
    foreground: &ImagePatch,
    psf: &Psf,
    margin: Padding,
    options: &BlurOptions,
) -> Result<ImagePatch> {
    let (w, h) = foreground.dimensions();
    let (cw, ch) = (w + margin.left + margin.right, h + margin.top + margin.bottom);
    let mut color = [vec![0.0f32; cw * ch], vec![0.0f32; cw * ch], vec![0.0f32; cw * ch]];
    let mut alpha = vec![0.0f32; cw * ch];
    for y in 0..h {
        for x in 0..w {
            let dst = (y + margin.top) * cw + x + margin.left;
            let a = foreground.alpha().map_or(1.0, |mask| mask[y * w + x]);
            let rgb = foreground.get(x, y);
            for (plane, v) in color.iter_mut().zip(rgb) {
                plane[dst] = v * a;
            }
            alpha[dst] = a;
        }
    }

    let canvas = ImagePatch::from_planes(cw, ch, color, Some(alpha))?;
    let smeared = BlurEngine::apply_with_options(&canvas, psf, options)?;
    let coverage = smeared.alpha().map(<[f32]>::to_vec).unwrap_or_default();
    let unpremultiply = |plane: &[f32]| -> Vec<f32> {
        plane
            .iter()
            .zip(&coverage)
            .map(|(&v, &a)| if a > MIN_COVERAGE { v / a } else { 0.0 })
            .collect()
    };
    let color = [
        unpremultiply(smeared.channel(0)),
        unpremultiply(smeared.channel(1)),
        unpremultiply(smeared.channel(2)),
    ];
    ImagePatch::from_planes(cw, ch, color, Some(coverage))
}

// ============================================================
// Deblur pipeline
// ============================================================

/// Output of a deblur run
#[derive(Debug, Clone)]
pub struct DeblurResult {
    pub code: ExposureCode,
    pub psf: Psf,
    /// Deblurred working patch (rectified when a quad was given)
    pub deblurred: ImagePatch,
    /// Deblurred region placed back into the input image
    pub composite: ImagePatch,
    /// PSNR against the reference, when one was supplied
    pub psnr: Option<f64>,
    pub elapsed_seconds: f64,
}

/// Optional rectification, deblur and placement back into the image
pub struct DeblurPipeline {
    config: PipelineConfig,
}

impl DeblurPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Deblur `image`, or only the `quad` region of it
    ///
    /// With a quad the region is rectified first and the PSF is built at 0°,
    /// since motion runs along +x in the rectified frame. The result is
    /// warped back and composited over the input. `reference` is a sharp
    /// version of `image`; it goes through the same rectification and is
    /// compared against the deblurred working patch.
    pub fn run(
        &self,
        image: &ImagePatch,
        quad: Option<&MotionQuad>,
        reference: Option<&ImagePatch>,
        progress: &dyn ProgressCallback,
    ) -> Result<DeblurResult> {
        let start = Instant::now();
        let cfg = &self.config;

        let code = cfg.exposure_code()?;
        let angle = if quad.is_some() { 0.0 } else { cfg.angle };
        let psf = cfg.build_psf(&code, angle)?;
        progress.on_debug(&format!("code {} at {:.1} deg", code, angle));

        let homography = match quad {
            Some(q) => {
                progress.on_step_start(ProcessingStage::Rectifying.name());
                let h = MotionPathTransform::estimate(q)?;
                progress.on_step_complete("Rectify", &format!("{}x{}", h.size().0, h.size().1));
                Some(h)
            }
            None => None,
        };
        let working = match &homography {
            Some(h) => MotionPathTransform::rectify(image, h)?,
            None => image.clone(),
        };

        let params = cfg.deblur_parameters();
        params.validate()?;
        progress.on_step_start(ProcessingStage::Deblurring.name());
        let mut deblurred = working;
        for pass in 1..=params.passes {
            let single = DeblurParameters {
                passes: 1,
                ..params.clone()
            };
            deblurred = DeblurEngine::deblur(&deblurred, &psf, &single)?;
            progress.on_step_progress(pass, params.passes);
        }
        progress.on_step_complete(
            "Deblur",
            &format!("{}, lambda {}, {} pass(es)", params.method, params.lambda, params.passes),
        );

        let composite = match &homography {
            Some(h) => {
                progress.on_step_start(ProcessingStage::Compositing.name());
                let warped = MotionPathTransform::unrectify(&deblurred, h, image.dimensions())?;
                Compositor::place(image, &warped, (0, 0))
            }
            None => deblurred.clone(),
        };

        let psnr = match reference {
            Some(r) => {
                let value = match &homography {
                    Some(h) => metrics::psnr(&MotionPathTransform::rectify(r, h)?, &deblurred)?,
                    None => metrics::psnr(r, &deblurred)?,
                };
                progress.on_step_complete("PSNR", &format!("{:.2} dB", value));
                Some(value)
            }
            None => None,
        };

        let elapsed_seconds = start.elapsed().as_secs_f64();
        info!(lambda = params.lambda, passes = params.passes, ?psnr, elapsed_seconds, "deblur pipeline finished");

        Ok(DeblurResult {
            code,
            psf,
            deblurred,
            composite,
            psnr,
            elapsed_seconds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<String>>,
        progress: Mutex<Vec<(usize, usize)>>,
    }

    impl ProgressCallback for Recorder {
        fn on_step_start(&self, step: &str) {
            self.steps.lock().unwrap().push(step.to_string());
        }

        fn on_step_progress(&self, current: usize, total: usize) {
            self.progress.lock().unwrap().push((current, total));
        }
    }

    fn small_config() -> PipelineConfig {
        PipelineConfig {
            code_kind: CodeKind::Mura,
            code_length: 7,
            subpixel: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_config() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.code_kind, CodeKind::Optimal);
        assert_eq!(cfg.code_length, DEFAULT_CODE_LENGTH);
        assert_eq!(cfg.lambda, DEFAULT_LAMBDA);
        assert_eq!(cfg.deblur_parameters().passes, 1);
    }

    #[test]
    fn test_fingerprint_ignores_output_dir() {
        let a = PipelineConfig::default();
        let b = PipelineConfig {
            output_dir: PathBuf::from("elsewhere"),
            ..a.clone()
        };
        let c = PipelineConfig {
            angle: 10.0,
            ..a.clone()
        };
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 16);
        assert!(a.to_json().unwrap().contains("\"deblur_method\": \"wiener\""));
    }

    #[test]
    fn test_blur_pipeline_reports_steps() {
        let fg = ImagePatch::filled(12, 6, [1.0, 0.0, 0.0]).unwrap();
        let bg = ImagePatch::filled(30, 20, [0.0, 0.0, 1.0]).unwrap();
        let recorder = Recorder::default();
        let result = BlurPipeline::new(small_config())
            .run(&fg, &bg, (5, 5), &recorder)
            .unwrap();

        assert_eq!(result.code.len(), 7);
        // 7x1 kernel margins on every side
        assert_eq!(result.blurred.dimensions(), (26, 8));
        assert_eq!(result.composite.dimensions(), (30, 20));
        assert_eq!(result.composite.get(0, 0), [0.0, 0.0, 1.0]);
        assert_eq!(recorder.steps.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_deblur_pipeline_whole_image_with_reference() {
        let mut sharp = ImagePatch::filled(40, 8, [0.5; 3]).unwrap();
        for x in 15..25 {
            sharp.set(x, 4, [1.0, 0.0, 0.2]);
        }
        let cfg = PipelineConfig {
            lambda: 1e-4,
            passes: 2,
            ..small_config()
        };
        let code = cfg.exposure_code().unwrap();
        let psf = cfg.build_psf(&code, cfg.angle).unwrap();
        let blurred = BlurEngine::apply(&sharp, &psf).unwrap();

        let recorder = Recorder::default();
        let result = DeblurPipeline::new(PipelineConfig { passes: 1, ..cfg })
            .run(&blurred, None, Some(&sharp), &recorder)
            .unwrap();
        assert!(result.psnr.unwrap() > 40.0);
        assert_eq!(result.composite, result.deblurred);
        assert_eq!(*recorder.progress.lock().unwrap(), vec![(1, 1)]);
    }

    #[test]
    fn test_deblur_pipeline_with_quad_keeps_outside() {
        let image = ImagePatch::filled(30, 20, [0.25, 0.5, 0.75]).unwrap();
        let quad = MotionQuad::from_rect(5.0, 5.0, 16.0, 6.0).unwrap();
        let result = DeblurPipeline::new(small_config())
            .run(&image, Some(&quad), None, &SilentProgress)
            .unwrap();
        assert_eq!(result.deblurred.dimensions(), (16, 6));
        assert_eq!(result.composite.dimensions(), (30, 20));
        assert_eq!(result.composite.get(0, 0), [0.25, 0.5, 0.75]);
        // A flat region comes back flat
        let inside = result.composite.get(12, 8);
        assert!((inside[1] - 0.5).abs() < 2e-3, "inside {:?}", inside);
        assert!(result.psnr.is_none());
    }

    #[test]
    fn test_deblur_pipeline_propagates_bad_lambda() {
        let image = ImagePatch::filled(20, 4, [0.5; 3]).unwrap();
        let cfg = PipelineConfig {
            lambda: 0.0,
            ..small_config()
        };
        assert!(DeblurPipeline::new(cfg)
            .run(&image, None, None, &SilentProgress)
            .is_err());
    }

    #[test]
    fn test_blur_pipeline_keeps_smear_past_foreground() {
        // Opaque block near the right edge of a transparent foreground
        let mut fg = ImagePatch::filled(16, 8, [1.0, 0.0, 0.0])
            .unwrap()
            .with_uniform_alpha(0.0);
        for y in 0..8 {
            for x in 10..14 {
                fg.set_alpha(x, y, 1.0);
            }
        }
        let bg = ImagePatch::filled(60, 20, [0.0, 0.0, 1.0]).unwrap();
        let cfg = PipelineConfig {
            code_kind: CodeKind::Box,
            code_length: 15,
            subpixel: 1,
            ..Default::default()
        };
        let result = BlurPipeline::new(cfg).run(&fg, &bg, (20, 6), &SilentProgress).unwrap();

        let mass: f64 = result.blurred.alpha().unwrap().iter().map(|&a| a as f64).sum();
        assert!((mass - 32.0).abs() < 1e-3, "alpha mass {}", mass);

        // Partially covered smear pixels keep the object's color
        let (w, h) = result.blurred.dimensions();
        for y in 0..h {
            for x in 0..w {
                let a = result.blurred.alpha_at(x, y);
                if a > 0.01 {
                    let c = result.blurred.get(x, y);
                    assert!((c[0] - 1.0).abs() < 1e-3 && c[2].abs() < 1e-3, "({}, {}) {:?}", x, y, c);
                }
            }
        }

        // Box 15 anchored at its middle smears 7 px either way; columns
        // 23..41 of the background row through the block see the object
        let row = 10;
        assert_eq!(result.composite.get(22, row), [0.0, 0.0, 1.0]);
        assert!(result.composite.get(23, row)[0] > 0.0);
        assert!(result.composite.get(40, row)[0] > 0.0);
        assert_eq!(result.composite.get(41, row), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_blur_length_stretches_kernel() {
        let cfg = PipelineConfig {
            blur_length: Some(14),
            ..small_config()
        };
        let code = cfg.exposure_code().unwrap();
        assert_eq!(cfg.build_psf(&code, 0.0).unwrap().dimensions(), (14, 1));
        assert_eq!(small_config().build_psf(&code, 0.0).unwrap().dimensions(), (7, 1));
    }

    #[test]
    fn test_deblur_pipeline_constant_background() {
        let mut sharp = ImagePatch::filled(40, 2, [0.3; 3]).unwrap();
        for x in 12..26 {
            let v = ((x * 37) % 11) as f32 / 10.0;
            sharp.set(x, 0, [v; 3]);
            sharp.set(x, 1, [1.0 - v; 3]);
        }
        let cfg = PipelineConfig {
            lambda: 1e-6,
            deblur_method: DeblurMethod::ConstantBackground,
            ..small_config()
        };
        let code = cfg.exposure_code().unwrap();
        let psf = cfg.build_psf(&code, 0.0).unwrap();
        let blurred = BlurEngine::apply(&sharp, &psf).unwrap();
        let result = DeblurPipeline::new(cfg)
            .run(&blurred, None, Some(&sharp), &SilentProgress)
            .unwrap();
        assert!(result.psnr.unwrap() > 50.0);
    }
}
