//! coded-exposure - fluttered-shutter motion blur simulation and deblurring
//!
//! A binary exposure code describes when the shutter is open during a linear
//! motion. Convolving an image with the code's point-spread function gives
//! the blur a camera would record; because a well-chosen code keeps the
//! kernel's spectrum away from zero, a regularized inverse filter recovers
//! the sharp image.
//!
//! # Modules
//!
//! - [`code`]: exposure code generation (box, random, MURA, optimal)
//! - [`psf`]: point-spread function along a motion angle
//! - [`blur`]: convolution of patches with a PSF
//! - [`deblur`]: regularized frequency-domain deconvolution
//! - [`smearing`]: row-wise least squares against a smearing matrix
//! - [`composite`]: alpha compositing onto a background
//! - [`transform`]: motion quad rectification via a homography
//! - [`pipeline`]: end-to-end blur and deblur runs
//! - [`sweep`]: parallel angle sweeps scored by PSNR
//!
//! # Example
//!
//! ```
//! use coded_exposure::{BlurEngine, CodeGenerator, CodeKind, DeblurEngine, DeblurParameters, ImagePatch, PsfBuilder};
//!
//! let code = CodeGenerator::generate(CodeKind::Mura, 7, None)?;
//! let psf = PsfBuilder::build(&code, 0.0, 4)?;
//! let sharp = ImagePatch::filled(32, 8, [0.5, 0.5, 0.5])?;
//! let blurred = BlurEngine::apply(&sharp, &psf)?;
//! let restored = DeblurEngine::deblur(&blurred, &psf, &DeblurParameters::default())?;
//! assert_eq!(restored.dimensions(), (32, 8));
//! # Ok::<(), coded_exposure::ExposureError>(())
//! ```

pub mod blur;
pub mod cli;
pub mod code;
pub mod composite;
pub mod config;
pub mod deblur;
pub mod fft;
pub mod metrics;
pub mod patch;
pub mod pipeline;
pub mod progress;
pub mod psf;
pub mod session;
pub mod smearing;
pub mod sweep;
pub mod transform;
pub mod types;

// Core
pub use blur::{BlurEngine, BlurOptions, BlurOptionsBuilder, ConvolutionMethod};
pub use code::{CodeGenerator, CodeKind, ExposureCode};
pub use composite::Compositor;
pub use deblur::{DeblurEngine, DeblurMethod, DeblurParameters, DeblurParametersBuilder};
pub use fft::EdgeMode;
pub use patch::ImagePatch;
pub use psf::{Psf, PsfBuilder};
pub use transform::{Homography, MotionPathTransform, MotionQuad};
pub use types::{ExposureError, Result};

// Pipeline
pub use pipeline::{
    BlurPipeline, BlurResult, DeblurPipeline, DeblurResult, PipelineConfig, ProgressCallback,
    SilentProgress,
};
pub use sweep::{AngleRange, AngleSweep, SweepRecord, SweepSummary};

// Shell
pub use cli::{exit_codes, Cli, Commands};
pub use config::{CliOverrides, Config};
pub use progress::{ConsoleProgress, OutputMode, ProcessingStage};
pub use session::{SessionAction, SessionLog};
