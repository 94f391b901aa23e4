//! Configuration loader and validator for the release tracker.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on names per GraphQL release query and repos per star page.
pub const MAX_PER_CALL: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub gh: Gh,
    #[serde(default)]
    pub report: Report,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Concurrency and batching knobs for a sync run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncOptions {
    pub workers: usize,
    pub batch_size: usize,
    pub stars_per_page: usize,
}

/// GitHub CLI invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gh {
    pub binary: String,
}

/// Release report defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
    pub days: u32,
    pub stale_after_days: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            batch_size: MAX_PER_CALL,
            stars_per_page: MAX_PER_CALL,
        }
    }
}

impl Default for Gh {
    fn default() -> Self {
        Self {
            binary: "gh".into(),
        }
    }
}

impl Default for Report {
    fn default() -> Self {
        Self {
            days: 7,
            stale_after_days: 3,
        }
    }
}

impl Default for Config {
    /// Defaults used when no config file is given. The data directory follows
    /// `XDG_DATA_HOME`, falling back to `~/.local/share`.
    fn default() -> Self {
        let base = std::env::var("XDG_DATA_HOME")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "~/.local/share".to_string());
        Self {
            app: App {
                data_dir: format!("{}/astrolabe", base.trim_end_matches('/')),
            },
            sync: SyncOptions::default(),
            gh: Gh::default(),
            report: Report::default(),
        }
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded against `HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// SQLite URL for the tracker database. `DATABASE_URL` wins when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            let path = PathBuf::from(self.app.resolved_data_dir()).join("astrolabe.db");
            format!("sqlite://{}", path.display())
        })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `astrolabe.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("astrolabe.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.sync.workers == 0 {
        return Err(ConfigError::Invalid("sync.workers must be > 0"));
    }
    if cfg.sync.batch_size == 0 || cfg.sync.batch_size > MAX_PER_CALL {
        return Err(ConfigError::Invalid("sync.batch_size must be within 1..=100"));
    }
    if cfg.sync.stars_per_page == 0 || cfg.sync.stars_per_page > MAX_PER_CALL {
        return Err(ConfigError::Invalid(
            "sync.stars_per_page must be within 1..=100",
        ));
    }
    if cfg.gh.binary.trim().is_empty() {
        return Err(ConfigError::Invalid("gh.binary must be non-empty"));
    }
    if cfg.report.days == 0 {
        return Err(ConfigError::Invalid("report.days must be > 0"));
    }
    Ok(())
}

/// Returns an example YAML config with every section filled in.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "~/.local/share/astrolabe"

sync:
  workers: 10
  batch_size: 100
  stars_per_page: 100

gh:
  binary: "gh"

report:
  days: 7
  stale_after_days: 3
"#
}
