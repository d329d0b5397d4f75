//! Blur angle sweep
//!
//! Runs blur then deblur for every angle of a range and scores each result
//! by PSNR against the unblurred composite. Without a motion quad the deblur
//! uses the same angle as the blur; with a quad the region is rectified and
//! deblurred along the quad's first edge, which measures how sensitive the
//! reconstruction is to a misjudged motion direction.

use chrono::{DateTime, Local};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::composite::Compositor;
use crate::patch::ImagePatch;
use crate::pipeline::{BlurPipeline, DeblurPipeline, PipelineConfig, SilentProgress};
use crate::transform::MotionQuad;
use crate::types::{ExposureError, Result};

/// Half-open angle range `[start, end)` in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleRange {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for AngleRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 180.0,
            step: 5.0,
        }
    }
}

impl AngleRange {
    /// Angles of the range in increasing order
    pub fn angles(&self) -> Result<Vec<f64>> {
        if ![self.start, self.end, self.step].iter().all(|v| v.is_finite()) {
            return Err(ExposureError::InvalidParameter(
                "sweep range must be finite".to_string(),
            ));
        }
        if self.step <= 0.0 {
            return Err(ExposureError::InvalidParameter(format!(
                "sweep step must be > 0, got {}",
                self.step
            )));
        }
        if self.end <= self.start {
            return Err(ExposureError::InvalidParameter(format!(
                "sweep end {} must be greater than start {}",
                self.end, self.start
            )));
        }
        let count = ((self.end - self.start) / self.step).ceil() as usize;
        Ok((0..count)
            .map(|i| self.start + i as f64 * self.step)
            .filter(|a| *a < self.end)
            .collect())
    }
}

/// Outcome for one angle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRecord {
    pub angle: f64,
    pub psnr: Option<f64>,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// All records of a sweep plus the settings that produced them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSummary {
    pub generated_at: DateTime<Local>,
    pub fingerprint: String,
    pub config: PipelineConfig,
    pub range: AngleRange,
    pub records: Vec<SweepRecord>,
}

impl SweepSummary {
    /// Record with the highest PSNR
    pub fn best(&self) -> Option<&SweepRecord> {
        self.records
            .iter()
            .filter(|r| r.psnr.is_some())
            .max_by(|a, b| {
                let (pa, pb) = (a.psnr.unwrap_or(f64::MIN), b.psnr.unwrap_or(f64::MIN));
                pa.total_cmp(&pb)
            })
    }

    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| r.error.is_some()).count()
    }

    /// `angle,psnr,elapsed_seconds,error` rows sorted by angle
    pub fn to_csv(&self) -> String {
        let mut out = String::from("angle,psnr,elapsed_seconds,error\n");
        for r in &self.records {
            let psnr = r.psnr.map(|p| format!("{:.4}", p)).unwrap_or_default();
            let error = r
                .error
                .as_deref()
                .map(|e| format!("\"{}\"", e.replace('"', "\"\"")))
                .unwrap_or_default();
            let _ = writeln!(out, "{:.2},{},{:.4},{}", r.angle, psnr, r.elapsed_seconds, error);
        }
        out
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_csv())?;
        Ok(())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Blur/deblur sweep over motion angles
pub struct AngleSweep {
    config: PipelineConfig,
    range: AngleRange,
    quad: Option<MotionQuad>,
}

impl AngleSweep {
    pub fn new(config: PipelineConfig, range: AngleRange) -> Self {
        Self {
            config,
            range,
            quad: None,
        }
    }

    /// Deblur only the rectified quad region
    #[must_use]
    pub fn with_quad(mut self, quad: MotionQuad) -> Self {
        self.quad = Some(quad);
        self
    }

    /// Run every angle in parallel; `on_done` is called as each finishes
    ///
    /// A failing angle is recorded with its error and does not stop the
    /// others.
    pub fn run<F>(
        &self,
        foreground: &ImagePatch,
        background: &ImagePatch,
        offset: (i64, i64),
        on_done: F,
    ) -> Result<SweepSummary>
    where
        F: Fn(&SweepRecord) + Sync,
    {
        let angles = self.range.angles()?;
        let reference = Compositor::place(background, foreground, offset);
        info!(angles = angles.len(), quad = self.quad.is_some(), "starting angle sweep");

        let mut records: Vec<SweepRecord> = angles
            .par_iter()
            .map(|&angle| {
                let start = Instant::now();
                let record = match self.run_angle(angle, foreground, background, offset, &reference) {
                    Ok(psnr) => SweepRecord {
                        angle,
                        psnr: Some(psnr),
                        elapsed_seconds: start.elapsed().as_secs_f64(),
                        error: None,
                    },
                    Err(e) => {
                        warn!(angle, error = %e, "sweep angle failed");
                        SweepRecord {
                            angle,
                            psnr: None,
                            elapsed_seconds: start.elapsed().as_secs_f64(),
                            error: Some(e.to_string()),
                        }
                    }
                };
                on_done(&record);
                record
            })
            .collect();
        records.sort_by(|a, b| a.angle.total_cmp(&b.angle));

        Ok(SweepSummary {
            generated_at: Local::now(),
            fingerprint: self.config.fingerprint()?,
            config: self.config.clone(),
            range: self.range,
            records,
        })
    }

    fn run_angle(
        &self,
        angle: f64,
        foreground: &ImagePatch,
        background: &ImagePatch,
        offset: (i64, i64),
        reference: &ImagePatch,
    ) -> Result<f64> {
        let config = PipelineConfig {
            angle,
            ..self.config.clone()
        };
        let blurred = BlurPipeline::new(config.clone()).run(foreground, background, offset, &SilentProgress)?;
        let result = DeblurPipeline::new(config).run(
            &blurred.composite,
            self.quad.as_ref(),
            Some(reference),
            &SilentProgress,
        )?;
        result
            .psnr
            .ok_or_else(|| ExposureError::InvalidParameter("no PSNR computed".to_string()))
    }
}
