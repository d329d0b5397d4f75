//! coded-exposure - coded motion blur simulation and deblurring
//!
//! CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use coded_exposure::{
    exit_codes,
    // CLI
    cli::{BlurArgs, CodeArgs, DeblurArgs, DemoArgs, SweepArgs},
    Cli, Commands,
    // Config
    Config,
    // Pipeline
    AngleRange, AngleSweep, BlurPipeline, CodeKind, DeblurPipeline, ExposureError, ImagePatch,
    PipelineConfig, Psf,
    // Progress and logging
    progress::{job_progress_bar, print_summary},
    ConsoleProgress, OutputMode, ProcessingStage, ProgressCallback, SessionLog,
};
use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let mode = OutputMode::from_flags(cli.verbose, cli.quiet);
    let file_config = load_config(cli.config.as_deref());

    let result = match &cli.command {
        Commands::Code(args) => run_code(args, &file_config),
        Commands::Blur(args) => run_blur(args, &file_config, mode),
        Commands::Deblur(args) => run_deblur(args, &file_config, mode),
        Commands::Sweep(args) => run_sweep(args, &file_config, mode),
        Commands::Demo(args) => run_demo(args, mode),
        Commands::Info => run_info(),
    };

    std::process::exit(match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    });
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("coded_exposure={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Explicit config path, else the default lookup; a broken file falls back to defaults
fn load_config(path: Option<&Path>) -> Config {
    let loaded = match path {
        Some(p) => Config::load_from_path(p),
        None => Config::load(),
    };
    loaded.unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config file: {}", e);
        Config::default()
    })
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ExposureError>() {
        Some(ExposureError::ImageNotFound(_)) => exit_codes::INPUT_NOT_FOUND,
        Some(ExposureError::InvalidParameter(_)) | Some(ExposureError::InvalidGeometry(_)) => {
            exit_codes::INVALID_ARGS
        }
        _ => exit_codes::GENERAL_ERROR,
    }
}

fn load_image(path: &Path, what: &str) -> Result<ImagePatch> {
    let patch = ImagePatch::open(path).with_context(|| format!("loading {} image", what))?;
    Ok(patch)
}

// ============ Code Command ============

fn run_code(args: &CodeArgs, file_config: &Config) -> Result<()> {
    let config = file_config.merge_with_cli(&args.overrides());
    let code = config.exposure_code()?;

    println!("Kind:          {}", config.code_kind);
    println!("Length:        {}", code.len());
    println!("Open chips:    {}", code.open_count());
    println!("Code:          {}", code);
    println!("Min |DFT|:     {:.6}", code.min_dft_magnitude());

    if args.spectrum {
        println!();
        println!("Spectrum (zero-padded to {}):", 2 * code.len());
        for (k, m) in code.spectrum(2 * code.len()).iter().enumerate() {
            println!("  {:4}  {:.6}", k, m);
        }
    }
    Ok(())
}

// ============ Blur Command ============

fn run_blur(args: &BlurArgs, file_config: &Config, mode: OutputMode) -> Result<()> {
    let config = file_config.merge_with_cli(&args.overrides());
    if mode.should_show(OutputMode::Normal) {
        println!(
            "Blurring {} ({} code, length {}, {:.1} deg)",
            args.foreground.display(),
            config.code_kind,
            config.code_length,
            config.angle
        );
    }

    let progress = ConsoleProgress::new(mode);
    progress.on_step_start(ProcessingStage::Loading.name());
    let foreground = load_image(&args.foreground, "foreground")?;
    let background = load_image(&args.background, "background")?;
    progress.on_step_complete(
        "Load",
        &format!(
            "{}x{} over {}x{}",
            foreground.width(),
            foreground.height(),
            background.width(),
            background.height()
        ),
    );

    let result = BlurPipeline::new(config.clone()).run(&foreground, &background, args.offset, &progress)?;

    progress.on_step_start(ProcessingStage::Saving.name());
    let out_dir = &config.output_dir;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    result.blurred.save(&out_dir.join("blurred_foreground.png"))?;
    result.composite.save(&out_dir.join("blurred.png"))?;
    psf_image(&result.psf).save(out_dir.join("psf.png"))?;
    fs::write(out_dir.join("params.json"), config.to_json()?)?;

    if mode.should_show(OutputMode::Normal) {
        println!(
            "  Blur offset: ({:.2}, {:.2}) px",
            result.blur_offset.0, result.blur_offset.1
        );
        println!("  Output: {}", out_dir.display());
    }
    progress.finish();
    Ok(())
}

/// Kernel scaled so its largest tap is white
fn psf_image(psf: &Psf) -> GrayImage {
    let peak = psf.weights().iter().cloned().fold(0.0f64, f64::max);
    GrayImage::from_fn(psf.width() as u32, psf.height() as u32, |x, y| {
        let w = psf.get(x as usize, y as usize);
        let v = if peak > 0.0 { w / peak } else { 0.0 };
        Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
    })
}

// ============ Deblur Command ============

fn run_deblur(args: &DeblurArgs, file_config: &Config, mode: OutputMode) -> Result<()> {
    let config = file_config.merge_with_cli(&args.overrides());
    let progress = ConsoleProgress::new(mode);
    progress.on_step_start(ProcessingStage::Loading.name());
    let input = load_image(&args.input, "input")?;
    let reference = args
        .reference
        .as_deref()
        .map(|p| load_image(p, "reference"))
        .transpose()?;
    progress.on_step_complete("Load", &format!("{}x{}", input.width(), input.height()));

    let mut session = if args.session {
        let mut log = SessionLog::create_in(&config.output_dir.join("sessions"))?;
        log.log_config(&config)?;
        Some(log)
    } else {
        None
    };

    if mode.should_show(OutputMode::Normal) {
        println!(
            "Deblurring {} ({}, lambda {}, {} pass(es))",
            args.input.display(),
            config.deblur_method,
            config.lambda,
            config.passes
        );
    }

    let result = DeblurPipeline::new(config.clone()).run(
        &input,
        args.quad.as_ref(),
        reference.as_ref(),
        &progress,
    )?;

    progress.on_step_start(ProcessingStage::Saving.name());
    let out_dir = &config.output_dir;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let output_path = out_dir.join("deblurred.png");
    result.composite.save(&output_path)?;
    if args.quad.is_some() {
        result.deblurred.save(&out_dir.join("deblurred_region.png"))?;
    }

    if let Some(log) = session.as_mut() {
        if let Some(quad) = &args.quad {
            log.log_parameter("quad", quad)?;
        }
        log.log_action(
            "deblur",
            json!({
                "input": args.input.display().to_string(),
                "output": output_path.display().to_string(),
                "psnr": result.psnr,
                "elapsed_seconds": result.elapsed_seconds,
            }),
        )?;
        log.close()?;
        if let Some(path) = log.path() {
            if mode.should_show(OutputMode::Normal) {
                println!("  Session log: {}", path.display());
            }
        }
    }

    if mode.should_show(OutputMode::Normal) {
        if let Some(psnr) = result.psnr {
            println!("  PSNR: {:.2} dB", psnr);
        }
        println!("  Output: {}", output_path.display());
    }
    progress.finish();
    Ok(())
}

// ============ Sweep Command ============

fn run_sweep(args: &SweepArgs, file_config: &Config, mode: OutputMode) -> Result<()> {
    let base = match &args.session {
        Some(path) => {
            let file = session_file(path)?;
            if mode.should_show(OutputMode::Verbose) {
                println!("Using session {}", file.display());
            }
            SessionLog::load(&file)
                .and_then(|log| log.pipeline_config())
                .with_context(|| format!("reading session {}", file.display()))?
        }
        None => file_config.to_pipeline_config(),
    };
    let config: PipelineConfig = args.overrides().apply_to(base);

    if let Some(threads) = args.threads {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
            warn!(error = %e, "could not configure worker threads");
        }
    }

    let foreground = load_image(&args.foreground, "foreground")?;
    let background = load_image(&args.background, "background")?;
    let range = AngleRange {
        start: args.start,
        end: args.end,
        step: args.step,
    };
    let total = range.angles()?.len();

    let mut sweep = AngleSweep::new(config.clone(), range);
    if let Some(quad) = args.quad {
        sweep = sweep.with_quad(quad);
    }

    let bar = job_progress_bar(total as u64, mode);
    let summary = sweep.run(&foreground, &background, args.offset, |record| {
        bar.set_message(format!("{:.1} deg", record.angle));
        bar.inc(1);
    })?;
    bar.finish_and_clear();

    let out_dir = &config.output_dir;
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
    let stem = format!("sweep_{}", summary.fingerprint);
    let csv_path = out_dir.join(format!("{}.csv", stem));
    let json_path = out_dir.join(format!("{}.json", stem));
    summary.write_csv(&csv_path)?;
    summary.write_json(&json_path)?;

    if mode.should_show(OutputMode::Normal) {
        let failures = summary.failures();
        print_summary("Angle Sweep", total, total - failures, failures);
        if let Some(best) = summary.best() {
            println!(
                "  Best angle: {:.1} deg ({:.2} dB)",
                best.angle,
                best.psnr.unwrap_or_default()
            );
        }
        println!("  CSV:  {}", csv_path.display());
        println!("  JSON: {}", json_path.display());
    }
    Ok(())
}

/// A session file as given, or the newest session log in a directory
fn session_file(path: &Path) -> Result<PathBuf> {
    if !path.is_dir() {
        return Ok(path.to_path_buf());
    }
    SessionLog::find_latest(path, None)?.ok_or_else(|| {
        anyhow::Error::from(ExposureError::InvalidParameter(format!(
            "no session logs in {}",
            path.display()
        )))
    })
}

// ============ Demo Command ============

const DEMO_OBJECT_SIZE: u32 = 64;

fn run_demo(args: &DemoArgs, mode: OutputMode) -> Result<()> {
    let size = args.size.max(DEMO_OBJECT_SIZE);
    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;

    let background = demo_background(size);
    let object = demo_object(DEMO_OBJECT_SIZE);
    let bg_path = args.output.join("background.png");
    let fg_path = args.output.join("object.png");
    background.save(&bg_path)?;
    object.save(&fg_path)?;

    if mode.should_show(OutputMode::Normal) {
        let offset = (size - DEMO_OBJECT_SIZE) / 2;
        println!("Wrote {}", bg_path.display());
        println!("Wrote {}", fg_path.display());
        println!();
        println!("Try:");
        println!(
            "  coded-exposure blur {} {} --offset {},{} --angle 30 -o {}",
            fg_path.display(),
            bg_path.display(),
            offset,
            offset,
            args.output.join("blur").display()
        );
    }
    Ok(())
}

/// Light checkerboard with a grid on top
fn demo_background(size: u32) -> RgbImage {
    let mut img = RgbImage::from_fn(size, size, |x, y| {
        if (x / 32 + y / 32) % 2 == 0 {
            Rgb([225, 225, 220])
        } else {
            Rgb([190, 195, 205])
        }
    });
    let line = Rgb([90, 90, 110]);
    for i in (0..size).step_by(16) {
        let p = i as f32;
        let end = (size - 1) as f32;
        draw_line_segment_mut(&mut img, (p, 0.0), (p, end), line);
        draw_line_segment_mut(&mut img, (0.0, p), (end, p), line);
    }
    img
}

/// Opaque disc with stripes on a transparent square
fn demo_object(size: u32) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0]));
    let c = (size / 2) as i32;
    draw_filled_circle_mut(&mut img, (c, c), c - 4, Rgba([200, 40, 30, 255]));
    for (i, x) in (12..size.saturating_sub(12)).step_by(10).enumerate() {
        let color = if i % 2 == 0 {
            Rgba([250, 220, 60, 255])
        } else {
            Rgba([30, 60, 160, 255])
        };
        draw_filled_rect_mut(&mut img, Rect::at(x as i32, c - 14).of_size(4, 28), color);
    }
    img
}

// ============ Info Command ============

fn run_info() -> Result<()> {
    println!("coded-exposure v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("System Information:");
    println!("  Platform: {}", std::env::consts::OS);
    println!("  Arch: {}", std::env::consts::ARCH);
    println!("  CPUs: {}", num_cpus::get());

    println!();
    println!("Exposure Codes:");
    for kind in CodeKind::ALL {
        println!("  {}", kind);
    }

    println!();
    println!("Defaults:");
    let defaults = PipelineConfig::default();
    println!("  Code: {} x {}", defaults.code_kind, defaults.code_length);
    println!("  Subpixel: {}", defaults.subpixel);
    println!("  Lambda: {}", defaults.lambda);
    println!("  Deblur method: {}", defaults.deblur_method);

    println!();
    println!("Config File Locations:");
    for path in Config::search_paths() {
        let state = if path.is_file() { "found" } else { "not found" };
        println!("  {} ({})", display_path(&path), state);
    }
    Ok(())
}

fn display_path(path: &Path) -> String {
    if path.is_relative() {
        PathBuf::from(".").join(path).display().to_string()
    } else {
        path.display().to_string()
    }
}
