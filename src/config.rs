//! Application configuration loading and validation.
//!
//! Reads `sheet-agent.yaml` and resolves environment variables. A missing
//! file yields the defaults; a present but invalid file is an error.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::agent_core::types::StageTimeouts;
use crate::workbook::ApplyLayout;

/// File name searched for by `find_config_path`.
pub const CONFIG_FILE_NAME: &str = "sheet-agent.yaml";

/// Environment variable naming a directory that holds the config file.
pub const HOME_ENV_VAR: &str = "SHEET_AGENT_HOME";

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    /// The YAML could not be parsed into `AppConfig`.
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A value is outside its allowed range.
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

// ─── Public Types ───────────────────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path of the financial SQLite database.
    pub database_path: String,
    /// Path of the request history database. Defaults next to the log file.
    pub history_path: Option<String>,
    pub timeouts: TimeoutConfig,
    pub interpreter: InterpreterConfig,
    pub retriever: RetrieverConfig,
    pub layout: LayoutConfig,
    pub workbook: WorkbookConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "financials.db".to_string(),
            history_path: None,
            timeouts: TimeoutConfig::default(),
            interpreter: InterpreterConfig::default(),
            retriever: RetrieverConfig::default(),
            layout: LayoutConfig::default(),
            workbook: WorkbookConfig::default(),
        }
    }
}

/// Default per-stage budgets used by the CLI. Library callers always pass
/// their own timeouts to `Coordinator::submit`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub classification_ms: u64,
    pub retrieval_ms: u64,
    pub analysis_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            classification_ms: 5_000,
            retrieval_ms: 10_000,
            analysis_ms: 5_000,
        }
    }
}

impl TimeoutConfig {
    pub fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts::from_millis(self.classification_ms, self.retrieval_ms, self.analysis_ms)
    }
}

/// Which Interpreter implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterBackend {
    #[default]
    Keyword,
    Model,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub backend: InterpreterBackend,
    /// Classifications below this confidence are reported as failures.
    pub min_confidence: f64,
    pub model: ModelConfig,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            backend: InterpreterBackend::Keyword,
            min_confidence: 0.6,
            model: ModelConfig::default(),
        }
    }
}

/// OpenAI-compatible endpoint used by the model-backed Interpreter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model_name: "qwen2.5:7b".to_string(),
            temperature: 0.1,
            max_tokens: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Row limit when the request does not name one.
    pub default_limit: u32,
    /// Upper bound on any requested limit.
    pub max_limit: u32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 100,
        }
    }
}

/// A1 anchors for applied results.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub data_anchor: String,
    pub analysis_anchor: String,
    pub notes_anchor: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            data_anchor: "A1".to_string(),
            analysis_anchor: "A10".to_string(),
            notes_anchor: "H1".to_string(),
        }
    }
}

impl LayoutConfig {
    pub fn apply_layout(&self) -> Result<ApplyLayout, ConfigError> {
        ApplyLayout::parse(&self.data_anchor, &self.analysis_anchor, &self.notes_anchor).map_err(
            |e| ConfigError::InvalidValue {
                field: "layout".into(),
                reason: e.to_string(),
            },
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct WorkbookConfig {
    pub max_rows: u32,
    pub max_cols: u32,
}

impl Default for WorkbookConfig {
    fn default() -> Self {
        Self {
            max_rows: 1_000,
            max_cols: 26,
        }
    }
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("timeouts.classification_ms", self.timeouts.classification_ms),
            ("timeouts.retrieval_ms", self.timeouts.retrieval_ms),
            ("timeouts.analysis_ms", self.timeouts.analysis_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }

        let min = self.interpreter.min_confidence;
        if !(0.0..=1.0).contains(&min) {
            return Err(ConfigError::InvalidValue {
                field: "interpreter.min_confidence".into(),
                reason: format!("{min} is outside [0, 1]"),
            });
        }

        if self.retriever.default_limit == 0
            || self.retriever.default_limit > self.retriever.max_limit
        {
            return Err(ConfigError::InvalidValue {
                field: "retriever.default_limit".into(),
                reason: format!(
                    "must be between 1 and max_limit ({})",
                    self.retriever.max_limit
                ),
            });
        }

        if self.workbook.max_rows == 0 || self.workbook.max_cols == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workbook".into(),
                reason: "sheet dimensions must be non-zero".into(),
            });
        }

        let layout = self.layout.apply_layout()?;
        for (field, anchor) in [
            ("layout.data_anchor", layout.data_anchor),
            ("layout.analysis_anchor", layout.analysis_anchor),
            ("layout.notes_anchor", layout.notes_anchor),
        ] {
            if anchor.row >= self.workbook.max_rows || anchor.col >= self.workbook.max_cols {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    reason: format!("{anchor} is outside the workbook bounds"),
                });
            }
        }

        Ok(())
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `SHEET_AGENT_HOME` first, then searches upward from `start`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&home)).join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load, interpolate, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

/// Parse config YAML after `${VAR}` interpolation.
pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    // An empty document is valid and means "all defaults".
    let config: AppConfig = if interpolated.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?
    };
    config.validate()?;
    Ok(config)
}

/// Find and load the config, falling back to defaults when no file exists.
pub fn load_or_default(start: &Path) -> Result<(AppConfig, Option<PathBuf>), ConfigError> {
    match find_config_path(start) {
        Some(path) => {
            let config = load_config(&path)?;
            tracing::info!(path = %path.display(), "config: loaded");
            Ok((config, Some(path)))
        }
        None => {
            tracing::info!("config: no {CONFIG_FILE_NAME} found, using defaults");
            Ok((AppConfig::default(), None))
        }
    }
}

// ─── Env-var interpolation ──────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────
