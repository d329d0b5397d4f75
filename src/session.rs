//! Session parameter log
//!
//! Records timestamped actions and the latest value of every parameter the
//! user touched, saved as pretty JSON after each change. A saved session can
//! be loaded later to rebuild the [`PipelineConfig`] it ended with, which is
//! how sweeps reproduce an interactive session.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pipeline::PipelineConfig;
use crate::types::{ExposureError, Result};

/// One entry in the action timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAction {
    pub timestamp: DateTime<Local>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

/// Session log with optional auto-save
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLog {
    session_id: String,
    start_time: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end_time: Option<DateTime<Local>>,
    actions: Vec<SessionAction>,
    parameters: Map<String, Value>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLog {
    /// In-memory session with a fresh id
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(session_id: impl Into<String>) -> Self {
        let mut log = Self {
            session_id: session_id.into(),
            start_time: Local::now(),
            end_time: None,
            actions: Vec::new(),
            parameters: Map::new(),
            path: None,
        };
        log.push_action("session_start", Value::Object(Map::new()));
        log
    }

    /// Session that saves itself to `<log_dir>/session_<time>_<id>.json`
    pub fn create_in(log_dir: &Path) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let mut log = Self::new();
        let short_id: String = log.session_id.chars().take(8).collect();
        let file = format!(
            "session_{}_{}.json",
            log.start_time.format("%Y%m%d_%H%M%S"),
            short_id
        );
        log.path = Some(log_dir.join(file));
        log.save()?;
        Ok(log)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn actions(&self) -> &[SessionAction] {
        &self.actions
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Append an action and auto-save
    pub fn log_action(&mut self, kind: &str, data: Value) -> Result<()> {
        self.push_action(kind, data);
        self.autosave()
    }

    /// Record a single parameter value
    pub fn log_parameter<T: Serialize>(&mut self, name: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.parameters.insert(name.to_string(), value.clone());
        let mut data = Map::new();
        data.insert("parameter".to_string(), Value::String(name.to_string()));
        data.insert("value".to_string(), value);
        self.log_action("parameter_change", Value::Object(data))
    }

    /// Record every field of a pipeline configuration as one action
    pub fn log_config(&mut self, config: &PipelineConfig) -> Result<()> {
        let Value::Object(fields) = serde_json::to_value(config)? else {
            return Err(ExposureError::Config(
                "pipeline config did not serialize to an object".to_string(),
            ));
        };
        for (k, v) in &fields {
            self.parameters.insert(k.clone(), v.clone());
        }
        self.log_action("parameters_update", Value::Object(fields))
    }

    /// Rebuild the configuration from the recorded parameters
    ///
    /// Parameters that are missing fall back to the defaults; unknown keys
    /// are ignored.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let Value::Object(mut merged) = serde_json::to_value(PipelineConfig::default())? else {
            return Err(ExposureError::Config(
                "pipeline config did not serialize to an object".to_string(),
            ));
        };
        for (k, v) in &self.parameters {
            if merged.contains_key(k) {
                merged.insert(k.clone(), v.clone());
            }
        }
        Ok(serde_json::from_value(Value::Object(merged))?)
    }

    /// Mark the session finished and save
    pub fn close(&mut self) -> Result<()> {
        self.end_time = Some(Local::now());
        self.log_action("session_end", Value::Object(Map::new()))
    }

    /// Save to the session's own path
    pub fn save(&self) -> Result<PathBuf> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| ExposureError::Config("session has no log file".to_string()))?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Write pretty JSON to `path`, replacing it atomically
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let json = serde_json::to_string_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        debug!(path = %path.display(), actions = self.actions.len(), "saved session log");
        Ok(())
    }

    /// Load a saved session; it keeps saving to the same file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut log: Self = serde_json::from_str(&content)?;
        log.path = Some(path.to_path_buf());
        Ok(log)
    }

    /// Most recent session file in `log_dir`, optionally matching an id
    pub fn find_latest(log_dir: &Path, session_id: Option<&str>) -> Result<Option<PathBuf>> {
        if !log_dir.is_dir() {
            return Ok(None);
        }
        let mut best: Option<(DateTime<Local>, PathBuf)> = None;
        for entry in fs::read_dir(log_dir)? {
            let path = entry?.path();
            if path.extension().map_or(true, |e| e != "json") {
                continue;
            }
            let log = match Self::load(&path) {
                Ok(log) => log,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable session log");
                    continue;
                }
            };
            if session_id.is_some_and(|id| id != log.session_id) {
                continue;
            }
            if best.as_ref().map_or(true, |(t, _)| log.start_time > *t) {
                best = Some((log.start_time, path));
            }
        }
        Ok(best.map(|(_, p)| p))
    }

    fn push_action(&mut self, kind: &str, data: Value) {
        self.actions.push(SessionAction {
            timestamp: Local::now(),
            kind: kind.to_string(),
            data,
        });
    }

    fn autosave(&self) -> Result<()> {
        if self.path.is_some() {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CodeKind;
    use tempfile::tempdir;

    #[test]
    fn test_new_session_starts_with_action() {
        let log = SessionLog::new();
        assert_eq!(log.actions().len(), 1);
        assert_eq!(log.actions()[0].kind, "session_start");
        assert!(Uuid::parse_str(log.session_id()).is_ok());
        assert!(log.path().is_none());
    }

    #[test]
    fn test_log_parameter() {
        let mut log = SessionLog::with_id("abc");
        log.log_parameter("lambda", 0.01).unwrap();
        assert_eq!(log.parameters()["lambda"], serde_json::json!(0.01));
        let last = log.actions().last().unwrap();
        assert_eq!(last.kind, "parameter_change");
        assert_eq!(last.data["parameter"], "lambda");
    }

    #[test]
    fn test_pipeline_config_roundtrip_through_parameters() {
        let config = PipelineConfig {
            code_kind: CodeKind::Mura,
            code_length: 31,
            angle: 12.5,
            ..Default::default()
        };
        let mut log = SessionLog::new();
        log.log_config(&config).unwrap();
        log.log_parameter("angle", 30.0).unwrap();
        log.log_parameter("unrelated", "ignored").unwrap();

        let rebuilt = log.pipeline_config().unwrap();
        assert_eq!(rebuilt.code_kind, CodeKind::Mura);
        assert_eq!(rebuilt.code_length, 31);
        assert_eq!(rebuilt.angle, 30.0);
    }

    #[test]
    fn test_partial_parameters_use_defaults() {
        let mut log = SessionLog::new();
        log.log_parameter("code_length", 13).unwrap();
        let config = log.pipeline_config().unwrap();
        assert_eq!(config.code_length, 13);
        assert_eq!(config.lambda, PipelineConfig::default().lambda);
    }

    #[test]
    fn test_autosave_and_load() {
        let dir = tempdir().unwrap();
        let mut log = SessionLog::create_in(dir.path()).unwrap();
        let path = log.path().unwrap().to_path_buf();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("session_"));

        log.log_parameter("code_kind", "mura").unwrap();
        log.close().unwrap();

        let loaded = SessionLog::load(&path).unwrap();
        assert_eq!(loaded.session_id(), log.session_id());
        assert!(loaded.is_closed());
        assert_eq!(loaded.actions().len(), 3);
        assert_eq!(loaded.pipeline_config().unwrap().code_kind, CodeKind::Mura);
    }

    #[test]
    fn test_find_latest_by_id() {
        let dir = tempdir().unwrap();
        let a = SessionLog::create_in(dir.path()).unwrap();
        let b = SessionLog::with_id("second-session");
        b.save_to(&dir.path().join("other.json")).unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let found = SessionLog::find_latest(dir.path(), Some(a.session_id())).unwrap();
        assert_eq!(found.as_deref(), a.path());
        let found = SessionLog::find_latest(dir.path(), Some("second-session")).unwrap();
        assert_eq!(found, Some(dir.path().join("other.json")));
        assert!(SessionLog::find_latest(dir.path(), Some("missing")).unwrap().is_none());
    }

    #[test]
    fn test_save_without_path_fails() {
        let log = SessionLog::new();
        assert!(matches!(log.save(), Err(ExposureError::Config(_))));
    }
}
