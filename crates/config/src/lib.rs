//! Configuration loading, validation, and management for the AVS toolkit.
//!
//! Loads configuration from `~/.avs/config.toml` with environment variable
//! overrides for credentials. Components never read the environment
//! themselves: they receive the settings built here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Gemini models tried in order when researching.
pub const DEFAULT_GEMINI_MODELS: [&str; 4] = [
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-2.0-flash-001",
    "gemini-flash-latest",
];

/// Environment variables consulted for credentials.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const TAVILY_API_KEY_ENV: &str = "TAVILY_API_KEY";

/// The root configuration structure.
///
/// Maps directly to `~/.avs/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Research backends and retry policy
    #[serde(default)]
    pub research: ResearchConfig,

    /// MCP tool-server sessions
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Assembly-wide settings
    #[serde(default)]
    pub assembly: AssemblyConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,

    /// Gemini model fallback order.
    #[serde(default = "default_gemini_models")]
    pub gemini_models: Vec<String>,

    /// Whether Tavily is tried after the Gemini models.
    #[serde(default = "default_true")]
    pub tavily_enabled: bool,

    /// Attempts per backend for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubled for every further attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Per-request timeout. Grounded search is slow, so this is generous.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_gemini_models() -> Vec<String> {
    DEFAULT_GEMINI_MODELS.iter().map(|m| m.to_string()).collect()
}
fn default_true() -> bool {
    true
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    2000
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            tavily_api_key: None,
            gemini_models: default_gemini_models(),
            tavily_enabled: true,
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ResearchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ResearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchConfig")
            .field("gemini_api_key", &redact(&self.gemini_api_key))
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("gemini_models", &self.gemini_models)
            .field("tavily_enabled", &self.tavily_enabled)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Timeout for a single `tools/call`.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Timeout for the `initialize` handshake and `tools/list`.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

fn default_call_timeout_secs() -> u64 {
    120
}
fn default_handshake_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl ToolsConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    #[serde(default = "default_file_read_timeout_secs")]
    pub file_read_timeout_secs: u64,
}

fn default_file_read_timeout_secs() -> u64 {
    10
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            file_read_timeout_secs: default_file_read_timeout_secs(),
        }
    }
}

impl AssemblyConfig {
    pub fn file_read_timeout(&self) -> Duration {
        Duration::from_secs(self.file_read_timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.avs/config.toml).
    ///
    /// Also checks environment variables for credentials:
    /// - `GEMINI_API_KEY`
    /// - `TAVILY_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
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

    /// Fill missing credentials from an environment lookup.
    ///
    /// Values from the config file win; blank variables are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if self.research.gemini_api_key.is_none() {
            self.research.gemini_api_key = non_blank(GEMINI_API_KEY_ENV);
        }
        if self.research.tavily_api_key.is_none() {
            self.research.tavily_api_key = non_blank(TAVILY_API_KEY_ENV);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".avs")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.research.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_attempts must be at least 1".into(),
            ));
        }
        if self.research.request_timeout_secs == 0
            || self.tools.call_timeout_secs == 0
            || self.tools.handshake_timeout_secs == 0
            || self.assembly.file_read_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError("timeouts must be greater than 0".into()));
        }
        Ok(())
    }

    /// Whether any research credential is available.
    pub fn has_research_credentials(&self) -> bool {
        self.research.gemini_api_key.is_some() || self.research.tavily_api_key.is_some()
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
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.research.max_attempts, 3);
        assert_eq!(config.research.gemini_models[0], "gemini-2.5-flash");
        assert!(config.research.tavily_enabled);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.research.gemini_models, config.research.gemini_models);
        assert_eq!(parsed.tools.call_timeout_secs, config.tools.call_timeout_secs);
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.research.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.assembly.file_read_timeout_secs, 10);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[research]\ngemini_models = [\"gemini-2.0-flash\"]\ntavily_enabled = false\n\n[tools]\ncall_timeout_secs = 15\n",
        )
        .unwrap();
        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.research.gemini_models, vec!["gemini-2.0-flash"]);
        assert!(!config.research.tavily_enabled);
        assert_eq!(config.research.max_attempts, 3);
        assert_eq!(config.tools.call_timeout(), Duration::from_secs(15));
        assert_eq!(config.tools.handshake_timeout_secs, 30);
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[research\nmax_attempts = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_fills_missing_credentials_only() {
        let env: HashMap<&str, &str> = HashMap::from([
            (GEMINI_API_KEY_ENV, "  gem-key  "),
            (TAVILY_API_KEY_ENV, "env-tavily"),
        ]);
        let mut config = AppConfig::default();
        config.research.tavily_api_key = Some("file-tavily".into());
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.research.gemini_api_key.as_deref(), Some("gem-key"));
        assert_eq!(config.research.tavily_api_key.as_deref(), Some("file-tavily"));
        assert!(config.has_research_credentials());
    }

    #[test]
    fn blank_env_values_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(|_| Some("   ".into()));
        assert!(!config.has_research_credentials());
    }

    #[test]
    fn debug_redacts_credentials() {
        let mut config = AppConfig::default();
        config.research.gemini_api_key = Some("super-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
