//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MAILVERDICT_CONFIG` (environment variable)
//! 2. `~/.config/mailverdict/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailverdict\config.toml` (Windows)
//! 3. Built-in defaults
//!
//! `OLLAMA_HOST` and `OLLAMA_MODEL` override the `[oracle]` table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ingest::IngestMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub oracle: OracleConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
    /// Override data directory for the database and logs.
    pub data_dir: Option<PathBuf>,
}

/// Classification service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of the Ollama server.
    pub host: String,
    /// Model name passed with every request.
    pub model: String,
    /// Labeling guideline embedded in the system prompt.
    pub guideline_path: PathBuf,
    /// Caller-side deadline for one classification (0 disables it).
    pub timeout_secs: u64,
}

/// Persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file (default: `<data_dir>/mailverdict.db`).
    pub database_path: Option<PathBuf>,
}

/// Ingestion limits and failure policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Largest accepted message in bytes (default: 26214400 = 25 MB).
    pub max_message_bytes: usize,
    /// Oracle failure policy for `parse`.
    pub parse_mode: IngestMode,
    /// Oracle failure policy for `analyze`.
    pub analyze_mode: IngestMode,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            data_dir: None,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            guideline_path: PathBuf::from("labeling_guide.md"),
            timeout_secs: 120,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: 25 * 1024 * 1024, // 25 MB
            parse_mode: IngestMode::Strict,
            analyze_mode: IngestMode::Degraded,
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration, searching standard locations, then apply env overrides.
///
/// Falls back to defaults if no file is found or on parse error.
pub fn load_config(explicit: Option<&Path>) -> Config {
    let mut config = explicit
        .map(Path::to_path_buf)
        .or_else(config_file_path)
        .filter(|path| path.exists())
        .and_then(|path| read_config(&path))
        .unwrap_or_default();

    config.apply_env(|key| std::env::var(key).ok());
    config
}

fn read_config(path: &Path) -> Option<Config> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
            return None;
        }
    };
    match toml::from_str::<Config>(&contents) {
        Ok(cfg) => {
            tracing::info!(path = %path.display(), "Loaded config");
            Some(cfg)
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
            None
        }
    }
}

impl Config {
    /// Overlay `OLLAMA_HOST` / `OLLAMA_MODEL` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|v| !v.trim().is_empty()) {
            self.oracle.host = host.trim().to_string();
        }
        if let Some(model) = lookup("OLLAMA_MODEL").filter(|v| !v.trim().is_empty()) {
            self.oracle.model = model.trim().to_string();
        }
    }
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILVERDICT_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mailverdict").join("config.toml"))
}

/// Return the data directory for the database and logs.
pub fn data_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.data_dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailverdict")
}

/// Return the SQLite database path.
pub fn database_path(config: &Config) -> PathBuf {
    config
        .storage
        .database_path
        .clone()
        .unwrap_or_else(|| data_dir(config).join("mailverdict.db"))
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    data_dir(config).join("mailverdict.log")
}
