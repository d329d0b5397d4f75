//! Configuration file support
//!
//! Settings are read from TOML. Lookup order:
//!
//! 1. `--config <path>` given on the command line
//! 2. `./coded-exposure.toml`
//! 3. `<config dir>/coded-exposure/config.toml`
//! 4. built-in defaults
//!
//! ```toml
//! [blur]
//! code_kind = "mura"
//! code_length = 31
//! angle = 30.0
//! blur_length = 40
//!
//! [deblur]
//! lambda = 0.01
//! passes = 2
//! method = "wiener"
//!
//! [output]
//! directory = "results"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::code::CodeKind;
use crate::deblur::DeblurMethod;
use crate::fft::EdgeMode;
use crate::pipeline::PipelineConfig;
use crate::types::{ExposureError, Result};

/// Local config file name
pub const LOCAL_CONFIG_FILE: &str = "coded-exposure.toml";

/// Application directory under the user config dir
pub const APP_CONFIG_DIR: &str = "coded-exposure";

/// `[blur]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlurSection {
    pub code_kind: Option<CodeKind>,
    pub code_length: Option<usize>,
    pub angle: Option<f64>,
    pub subpixel: Option<usize>,
    pub seed: Option<u64>,
    /// Travel in pixels, when it differs from the code length
    pub blur_length: Option<usize>,
    pub edge_mode: Option<EdgeMode>,
}

/// `[deblur]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeblurSection {
    pub lambda: Option<f64>,
    pub passes: Option<usize>,
    pub edge_mode: Option<EdgeMode>,
    pub method: Option<DeblurMethod>,
}

/// `[output]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub directory: Option<PathBuf>,
}

/// Contents of a config file; every value is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub blur: BlurSection,
    pub deblur: DeblurSection,
    pub output: OutputSection,
}

impl Config {
    /// Load from the default locations, or defaults when no file exists
    pub fn load() -> Result<Self> {
        for path in Self::search_paths() {
            if path.is_file() {
                return Self::load_from_path(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load from an explicit path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| ExposureError::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&content)
            .map_err(|e| ExposureError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ExposureError::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ExposureError::Config(e.to_string()))
    }

    /// Candidate files in lookup order
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = Self::user_config_path() {
            paths.push(dir);
        }
        paths
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_CONFIG_DIR).join("config.toml"))
    }

    /// File values over the built-in defaults
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            code_kind: self.blur.code_kind.unwrap_or(defaults.code_kind),
            code_length: self.blur.code_length.unwrap_or(defaults.code_length),
            angle: self.blur.angle.unwrap_or(defaults.angle),
            subpixel: self.blur.subpixel.unwrap_or(defaults.subpixel),
            seed: self.blur.seed.or(defaults.seed),
            blur_length: self.blur.blur_length.or(defaults.blur_length),
            blur_edge_mode: self.blur.edge_mode.unwrap_or(defaults.blur_edge_mode),
            lambda: self.deblur.lambda.unwrap_or(defaults.lambda),
            passes: self.deblur.passes.unwrap_or(defaults.passes),
            deblur_edge_mode: self.deblur.edge_mode.unwrap_or(defaults.deblur_edge_mode),
            deblur_method: self.deblur.method.unwrap_or(defaults.deblur_method),
            output_dir: self.output.directory.clone().unwrap_or(defaults.output_dir),
        }
    }

    /// Resolve into a pipeline configuration; CLI values take precedence
    pub fn merge_with_cli(&self, cli: &CliOverrides) -> PipelineConfig {
        cli.apply_to(self.to_pipeline_config())
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub code_kind: Option<CodeKind>,
    pub code_length: Option<usize>,
    pub angle: Option<f64>,
    pub subpixel: Option<usize>,
    pub seed: Option<u64>,
    pub blur_length: Option<usize>,
    pub blur_edge_mode: Option<EdgeMode>,
    pub lambda: Option<f64>,
    pub passes: Option<usize>,
    pub deblur_edge_mode: Option<EdgeMode>,
    pub deblur_method: Option<DeblurMethod>,
    pub output_dir: Option<PathBuf>,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the fields of `base` that were given on the command line
    pub fn apply_to(&self, base: PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            code_kind: self.code_kind.unwrap_or(base.code_kind),
            code_length: self.code_length.unwrap_or(base.code_length),
            angle: self.angle.unwrap_or(base.angle),
            subpixel: self.subpixel.unwrap_or(base.subpixel),
            seed: self.seed.or(base.seed),
            blur_length: self.blur_length.or(base.blur_length),
            blur_edge_mode: self.blur_edge_mode.unwrap_or(base.blur_edge_mode),
            lambda: self.lambda.unwrap_or(base.lambda),
            passes: self.passes.unwrap_or(base.passes),
            deblur_edge_mode: self.deblur_edge_mode.unwrap_or(base.deblur_edge_mode),
            deblur_method: self.deblur_method.unwrap_or(base.deblur_method),
            output_dir: self.output_dir.clone().unwrap_or(base.output_dir),
        }
    }
}
