//! Configuration loading, validation, and management for toolweave.
//!
//! Loads configuration from `~/.toolweave/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolweave/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Step loop policies
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Output stream settings
    #[serde(default)]
    pub stream: StreamConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What happens when a tool executor returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Convert into an `ExecutionFailed` result and keep looping
    #[default]
    Capture,
    /// Reject the whole run
    Propagate,
}

/// Whether tool calls requested on the last permitted Step still run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStepTools {
    #[default]
    Execute,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on Steps (and so on model invocations) per run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default)]
    pub tool_error_policy: ToolErrorPolicy,

    #[serde(default)]
    pub final_step_tools: FinalStepTools,

    /// Retries for a model invocation that fails before any chunk arrives.
    /// Zero keeps one invocation per Step; each retry is an extra invocation.
    #[serde(default)]
    pub max_retries: u32,

    /// If set, only these tools are declared to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_tools: Option<Vec<String>>,

    /// Close the side-channel once the finish hook has run
    #[serde(default = "default_true")]
    pub close_data_on_finish: bool,
}

fn default_max_steps() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            tool_error_policy: ToolErrorPolicy::default(),
            final_step_tools: FinalStepTools::default(),
            max_retries: 0,
            active_tools: None,
            close_data_on_finish: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Capacity of the bounded channel frames are delivered through
    #[serde(default = "default_frame_buffer")]
    pub frame_buffer: usize,
}

fn default_frame_buffer() -> usize {
    128
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_buffer: default_frame_buffer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load configuration from the default path, with env var overrides.
    ///
    /// Priority: env vars > config file > defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(steps) = std::env::var("TOOLWEAVE_MAX_STEPS") {
            self.orchestrator.max_steps = steps.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "TOOLWEAVE_MAX_STEPS must be a positive integer, got '{steps}'"
                ))
            })?;
        }

        if let Ok(level) = std::env::var("TOOLWEAVE_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolweave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_steps must be at least 1".into(),
            ));
        }

        if self.stream.frame_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "stream.frame_buffer must be at least 1".into(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.orchestrator.max_steps, 5);
        assert_eq!(config.orchestrator.tool_error_policy, ToolErrorPolicy::Capture);
        assert_eq!(config.orchestrator.final_step_tools, FinalStepTools::Execute);
        assert!(config.orchestrator.close_data_on_finish);
        assert_eq!(config.orchestrator.max_retries, 0);
        assert_eq!(config.stream.frame_buffer, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn zero_max_steps_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_level_rejected() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("loud"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert_eq!(result.unwrap(), AppConfig::default());
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_steps = 5"));
        assert!(toml_str.contains("tool_error_policy = \"capture\""));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[orchestrator]
max_steps = 1
tool_error_policy = "propagate"
final_step_tools = "skip"
active_tools = ["weather_lookup"]

[logging]
json = true
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.orchestrator.max_steps, 1);
        assert_eq!(config.orchestrator.tool_error_policy, ToolErrorPolicy::Propagate);
        assert_eq!(config.orchestrator.final_step_tools, FinalStepTools::Skip);
        assert_eq!(
            config.orchestrator.active_tools,
            Some(vec!["weather_lookup".to_string()])
        );
        assert_eq!(config.orchestrator.max_retries, 0);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.stream.frame_buffer, 128);
    }

    #[test]
    fn invalid_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nmax_steps = \"many\"").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
