//! Command-line interface definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::code::CodeKind;
use crate::config::CliOverrides;
use crate::deblur::DeblurMethod;
use crate::fft::EdgeMode;
use crate::transform::MotionQuad;

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGS: i32 = 2;
    pub const INPUT_NOT_FOUND: i32 = 3;
}

/// Coded-exposure motion blur simulation and deblurring
#[derive(Parser, Debug)]
#[command(name = "coded-exposure")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print an exposure code and its spectrum figure of merit
    Code(CodeArgs),
    /// Blur a foreground and composite it onto a background
    Blur(BlurArgs),
    /// Deblur an image, optionally only inside a motion quad
    Deblur(DeblurArgs),
    /// Blur and deblur over a range of motion angles and score each by PSNR
    Sweep(SweepArgs),
    /// Write sample input images
    Demo(DemoArgs),
    /// Show version and system information
    Info,
}

/// Exposure code and PSF options
#[derive(Args, Debug, Clone, Default)]
pub struct BlurParamArgs {
    /// Code kind: box, random, mura or optimal
    #[arg(short = 'k', long)]
    pub kind: Option<CodeKind>,

    /// Code length (blur length in pixels)
    #[arg(short = 'n', long)]
    pub length: Option<usize>,

    /// Motion angle in degrees (0 = right, 90 = down)
    #[arg(short, long, allow_hyphen_values = true)]
    pub angle: Option<f64>,

    /// Subpixel samples per pixel along the path
    #[arg(long)]
    pub subpixel: Option<usize>,

    /// Seed for random codes
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stretch the code over this many pixels of travel
    #[arg(long)]
    pub blur_length: Option<usize>,

    /// Edge handling for blur: zero or replicate
    #[arg(long)]
    pub blur_edge: Option<EdgeMode>,
}

/// Deconvolution options
#[derive(Args, Debug, Clone, Default)]
pub struct DeblurParamArgs {
    /// Regularization strength (> 0)
    #[arg(short, long)]
    pub lambda: Option<f64>,

    /// Number of filter passes
    #[arg(short, long)]
    pub passes: Option<usize>,

    /// Edge handling for deblur: zero or replicate
    #[arg(long)]
    pub deblur_edge: Option<EdgeMode>,

    /// Deconvolution: wiener or constant-background (horizontal motion only)
    #[arg(short, long)]
    pub method: Option<DeblurMethod>,
}

#[derive(Args, Debug)]
pub struct CodeArgs {
    #[command(flatten)]
    pub params: BlurParamArgs,

    /// Also print the zero-padded DFT magnitude
    #[arg(long)]
    pub spectrum: bool,
}

#[derive(Args, Debug)]
pub struct BlurArgs {
    /// Foreground image (alpha channel used when present)
    pub foreground: PathBuf,

    /// Background image
    pub background: PathBuf,

    /// Foreground position on the background as X,Y
    #[arg(long, default_value = "0,0", value_parser = parse_offset, allow_hyphen_values = true)]
    pub offset: (i64, i64),

    #[command(flatten)]
    pub params: BlurParamArgs,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct DeblurArgs {
    /// Blurred image
    pub input: PathBuf,

    /// Motion region as x1,y1,x2,y2,x3,y3,x4,y4 (first edge along the motion)
    #[arg(long, value_parser = parse_quad)]
    pub quad: Option<MotionQuad>,

    /// Sharp reference image for PSNR
    #[arg(long)]
    pub reference: Option<PathBuf>,

    #[command(flatten)]
    pub blur: BlurParamArgs,

    #[command(flatten)]
    pub deblur: DeblurParamArgs,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Record parameters and results in a session log in the output directory
    #[arg(long)]
    pub session: bool,
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Foreground image
    pub foreground: PathBuf,

    /// Background image
    pub background: PathBuf,

    #[arg(long, default_value = "0,0", value_parser = parse_offset, allow_hyphen_values = true)]
    pub offset: (i64, i64),

    /// First angle in degrees
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub start: f64,

    /// End angle in degrees (exclusive)
    #[arg(long, default_value_t = 180.0, allow_hyphen_values = true)]
    pub end: f64,

    /// Angle step in degrees
    #[arg(long, default_value_t = 5.0)]
    pub step: f64,

    /// Deblur only inside this quad
    #[arg(long, value_parser = parse_quad)]
    pub quad: Option<MotionQuad>,

    /// Take parameters from a saved session log, or from the newest one in
    /// a directory
    #[arg(long, value_name = "PATH")]
    pub session: Option<PathBuf>,

    #[command(flatten)]
    pub blur: BlurParamArgs,

    #[command(flatten)]
    pub deblur: DeblurParamArgs,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of worker threads (default: CPU count)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Output directory
    #[arg(short, long, default_value = "demo")]
    pub output: PathBuf,

    /// Background size in pixels
    #[arg(long, default_value_t = 256)]
    pub size: u32,
}

impl BlurParamArgs {
    fn apply(&self, overrides: &mut CliOverrides) {
        overrides.code_kind = self.kind;
        overrides.code_length = self.length;
        overrides.angle = self.angle;
        overrides.subpixel = self.subpixel;
        overrides.seed = self.seed;
        overrides.blur_length = self.blur_length;
        overrides.blur_edge_mode = self.blur_edge;
    }
}

impl DeblurParamArgs {
    fn apply(&self, overrides: &mut CliOverrides) {
        overrides.lambda = self.lambda;
        overrides.passes = self.passes;
        overrides.deblur_edge_mode = self.deblur_edge;
        overrides.deblur_method = self.method;
    }
}

impl CodeArgs {
    pub fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides::new();
        self.params.apply(&mut overrides);
        overrides
    }
}

impl BlurArgs {
    pub fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides::new();
        self.params.apply(&mut overrides);
        overrides.output_dir = self.output.clone();
        overrides
    }
}

impl DeblurArgs {
    pub fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides::new();
        self.blur.apply(&mut overrides);
        self.deblur.apply(&mut overrides);
        overrides.output_dir = self.output.clone();
        overrides
    }
}

impl SweepArgs {
    pub fn overrides(&self) -> CliOverrides {
        let mut overrides = CliOverrides::new();
        self.blur.apply(&mut overrides);
        self.deblur.apply(&mut overrides);
        overrides.output_dir = self.output.clone();
        overrides
    }
}

/// Parse `X,Y` into a pixel offset
pub fn parse_offset(s: &str) -> Result<(i64, i64), String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        return Err(format!("expected X,Y, got '{}'", s));
    }
    let x = parts[0].parse().map_err(|_| format!("invalid x '{}'", parts[0]))?;
    let y = parts[1].parse().map_err(|_| format!("invalid y '{}'", parts[1]))?;
    Ok((x, y))
}

/// Parse eight comma-separated numbers into a quad
pub fn parse_quad(s: &str) -> Result<MotionQuad, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|e| format!("invalid quad '{}': {}", s, e))?;
    if values.len() != 8 {
        return Err(format!("quad needs 8 numbers, got {}", values.len()));
    }
    MotionQuad::new([
        [values[0], values[1]],
        [values[2], values[3]],
        [values[4], values[5]],
        [values[6], values[7]],
    ])
    .map_err(|e| e.to_string())
}
