//! Configuration loader and validator for the digest builder.
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub builder: Builder,
    pub digest: Digest,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Builder workflow thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Builder {
    pub autosave_interval_seconds: u32,
    pub max_versions: u32,
    pub save_stale_minutes: u32,
    pub presence_window_minutes: u32,
    pub inactivity_window_hours: u32,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            autosave_interval_seconds: 30,
            max_versions: 10,
            save_stale_minutes: 5,
            presence_window_minutes: 5,
            inactivity_window_hours: 8,
        }
    }
}

/// Digest service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Digest {
    pub base_url: String,
    pub token: String,
}

/// Thresholds used by the session view and lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuilderSettings {
    pub autosave_interval_seconds: u32,
    pub max_versions: u32,
    pub save_stale_after: Duration,
    pub presence_window: Duration,
    pub inactivity_window: Duration,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Builder::default().settings()
    }
}

impl Builder {
    pub fn settings(&self) -> BuilderSettings {
        BuilderSettings {
            autosave_interval_seconds: self.autosave_interval_seconds,
            max_versions: self.max_versions,
            save_stale_after: Duration::minutes(self.save_stale_minutes as i64),
            presence_window: Duration::minutes(self.presence_window_minutes as i64),
            inactivity_window: Duration::hours(self.inactivity_window_hours as i64),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn settings(&self) -> BuilderSettings {
        self.builder.settings()
    }

    /// SQLite URL for the session store; `DATABASE_URL` takes precedence.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/builder.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    let b = &cfg.builder;
    if b.autosave_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "builder.autosave_interval_seconds must be > 0",
        ));
    }
    if b.max_versions == 0 {
        return Err(ConfigError::Invalid("builder.max_versions must be > 0"));
    }
    if b.save_stale_minutes == 0 {
        return Err(ConfigError::Invalid("builder.save_stale_minutes must be > 0"));
    }
    if b.presence_window_minutes == 0 {
        return Err(ConfigError::Invalid(
            "builder.presence_window_minutes must be > 0",
        ));
    }
    if b.inactivity_window_hours == 0 {
        return Err(ConfigError::Invalid(
            "builder.inactivity_window_hours must be > 0",
        ));
    }

    if cfg.digest.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("digest.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.digest.base_url).is_err() {
        return Err(ConfigError::Invalid("digest.base_url must be a valid URL"));
    }
    if cfg.digest.token.trim().is_empty() {
        return Err(ConfigError::Invalid("digest.token must be non-empty"));
    }

    Ok(())
}

/// Returns the example YAML shipped with the binary.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

builder:
  autosave_interval_seconds: 30
  max_versions: 10
  save_stale_minutes: 5
  presence_window_minutes: 5
  inactivity_window_hours: 8

digest:
  base_url: "http://localhost:8080/"
  token: "YOUR_DIGEST_API_TOKEN"
"#
}
