//! Progress reporting for command-line runs.
//!
//! Stage names used by the pipelines, verbosity handling, and the console
//! implementation of [`ProgressCallback`].

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Instant;

use crate::pipeline::ProgressCallback;

/// Processing stages of blur and deblur runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingStage {
    /// Loading input images
    #[default]
    Loading,
    /// Generating the exposure code
    GeneratingCode,
    /// Building the PSF
    BuildingPsf,
    /// Rectifying the motion quad
    Rectifying,
    /// Applying coded blur
    Blurring,
    /// Regularized deconvolution
    Deblurring,
    /// Alpha compositing onto the background
    Compositing,
    /// Writing output files
    Saving,
    /// Completed
    Completed,
}

impl ProcessingStage {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStage::Loading => "Loading",
            ProcessingStage::GeneratingCode => "GeneratingCode",
            ProcessingStage::BuildingPsf => "BuildingPsf",
            ProcessingStage::Rectifying => "Rectifying",
            ProcessingStage::Blurring => "Blurring",
            ProcessingStage::Deblurring => "Deblurring",
            ProcessingStage::Compositing => "Compositing",
            ProcessingStage::Saving => "Saving",
            ProcessingStage::Completed => "Completed",
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::Loading => "loading images",
            ProcessingStage::GeneratingCode => "generating exposure code",
            ProcessingStage::BuildingPsf => "building point-spread function",
            ProcessingStage::Rectifying => "rectifying motion region",
            ProcessingStage::Blurring => "applying coded blur",
            ProcessingStage::Deblurring => "deblurring",
            ProcessingStage::Compositing => "compositing",
            ProcessingStage::Saving => "saving output",
            ProcessingStage::Completed => "done",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// No output
    Quiet,
    /// Stage results only
    #[default]
    Normal,
    /// Stage starts and pass progress
    Verbose,
    /// Everything, debug notes included
    VeryVerbose,
}

impl OutputMode {
    /// Map `-v` count and `--quiet` to a mode
    pub fn from_flags(verbosity: u8, quiet: bool) -> Self {
        if quiet {
            return OutputMode::Quiet;
        }
        match verbosity {
            0 => OutputMode::Normal,
            1 => OutputMode::Verbose,
            _ => OutputMode::VeryVerbose,
        }
    }

    /// Check if output should be shown at this mode
    pub fn should_show(&self, required: OutputMode) -> bool {
        use OutputMode::*;
        match (self, required) {
            (Quiet, _) => false,
            (Normal, Quiet | Normal) => true,
            (Verbose, Quiet | Normal | Verbose) => true,
            (VeryVerbose, _) => true,
            _ => false,
        }
    }
}

/// Progress bar width in characters
const PROGRESS_BAR_WIDTH: usize = 40;

/// Build a progress bar string
pub fn build_progress_bar(percent: u8) -> String {
    let percent = percent.min(100);
    let filled = (percent as usize * PROGRESS_BAR_WIDTH) / 100;
    let empty = PROGRESS_BAR_WIDTH - filled;
    format!("[{}{}]", "=".repeat(filled), "-".repeat(empty))
}

/// indicatif bar for multi-job runs; hidden in quiet mode
pub fn job_progress_bar(total: u64, mode: OutputMode) -> ProgressBar {
    if !mode.should_show(OutputMode::Normal) {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    bar.set_style(style);
    bar
}

/// Console progress for single pipeline runs
#[derive(Debug)]
pub struct ConsoleProgress {
    mode: OutputMode,
    steps: Mutex<usize>,
    start_time: Instant,
}

impl ConsoleProgress {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            steps: Mutex::new(0),
            start_time: Instant::now(),
        }
    }

    /// Number of steps started so far
    pub fn steps_started(&self) -> usize {
        self.steps.lock().map(|s| *s).unwrap_or(0)
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Print the closing line of a run
    pub fn finish(&self) {
        if self.mode.should_show(OutputMode::Normal) {
            println!("  {} in {:.2}s", ProcessingStage::Completed.name(), self.elapsed_secs());
        }
    }
}

impl ProgressCallback for ConsoleProgress {
    fn on_step_start(&self, step: &str) {
        if let Ok(mut steps) = self.steps.lock() {
            *steps += 1;
        }
        if self.mode.should_show(OutputMode::Verbose) {
            println!("  Stage: {}", step);
        }
    }

    fn on_step_progress(&self, current: usize, total: usize) {
        if self.mode.should_show(OutputMode::Verbose) && total > 0 {
            let percent = ((current as f64 / total as f64) * 100.0) as u8;
            print!("\r    {} {:3}% ({}/{})", build_progress_bar(percent), percent, current, total);
            if current >= total {
                println!();
            }
            let _ = io::stdout().flush();
        }
    }

    fn on_step_complete(&self, step: &str, message: &str) {
        if self.mode.should_show(OutputMode::Normal) {
            println!("    {}: {}", step, message);
        }
    }

    fn on_debug(&self, message: &str) {
        if self.mode.should_show(OutputMode::VeryVerbose) {
            println!("    [DEBUG] {}", message);
        }
    }
}

/// Print the summary of a multi-job run
pub fn print_summary(title: &str, total: usize, ok_count: usize, error_count: usize) {
    println!();
    println!("{}", "=".repeat(60));
    println!("{}", title);
    println!("{}", "=".repeat(60));
    println!("  Total:      {}", total);
    println!("  Succeeded:  {}", ok_count);
    println!("  Errors:     {}", error_count);
    println!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(ProcessingStage::Loading.name(), "Loading");
        assert_eq!(ProcessingStage::BuildingPsf.name(), "BuildingPsf");
        assert_eq!(ProcessingStage::Deblurring.description(), "deblurring");
        assert_eq!(
            format!("{}", ProcessingStage::Blurring),
            "Blurring (applying coded blur)"
        );
        assert_eq!(ProcessingStage::default(), ProcessingStage::Loading);
    }

    #[test]
    fn test_build_progress_bar() {
        assert_eq!(build_progress_bar(0), "[----------------------------------------]");
        assert_eq!(build_progress_bar(50), "[====================--------------------]");
        assert_eq!(build_progress_bar(100), "[========================================]");
        assert_eq!(build_progress_bar(150), build_progress_bar(100));
        assert_eq!(build_progress_bar(25), "[==========------------------------------]");
    }

    #[test]
    fn test_output_mode_from_flags() {
        assert_eq!(OutputMode::from_flags(0, false), OutputMode::Normal);
        assert_eq!(OutputMode::from_flags(1, false), OutputMode::Verbose);
        assert_eq!(OutputMode::from_flags(7, false), OutputMode::VeryVerbose);
        assert_eq!(OutputMode::from_flags(2, true), OutputMode::Quiet);
    }

    #[test]
    fn test_output_mode_levels() {
        assert!(!OutputMode::Quiet.should_show(OutputMode::Quiet));
        assert!(OutputMode::Normal.should_show(OutputMode::Normal));
        assert!(!OutputMode::Normal.should_show(OutputMode::Verbose));
        assert!(OutputMode::Verbose.should_show(OutputMode::Verbose));
        assert!(!OutputMode::Verbose.should_show(OutputMode::VeryVerbose));
        assert!(OutputMode::VeryVerbose.should_show(OutputMode::VeryVerbose));
    }

    #[test]
    fn test_console_progress_counts_steps() {
        let progress = ConsoleProgress::new(OutputMode::Quiet);
        progress.on_step_start("a");
        progress.on_step_start("b");
        progress.on_step_progress(1, 2);
        assert_eq!(progress.steps_started(), 2);
    }

    #[test]
    fn test_quiet_job_bar_is_hidden() {
        let bar = job_progress_bar(10, OutputMode::Quiet);
        assert!(bar.is_hidden());
    }
}
