//! TOML configuration for the peak analyzer.
//!
//! Every section has defaults, so an empty file (or no file at all) is a
//! valid configuration. Command-line flags override what is loaded here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::analyzers::{FieldSchema, MAX_GLOBAL_WINDOW_DAYS};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PEAK_ANALYZER_CONFIG";

/// Configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "peak-analyzer.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Schema-driven analyzers, by registry name.
    #[serde(default)]
    pub analyzers: BTreeMap<String, FieldSchema>,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in the `PEAK_ANALYZER_CONFIG` environment variable.
    /// 2. `./peak-analyzer.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "PEAK_ANALYZER_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Range checks serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let days = self.analysis.global_window_days;
        ensure!(
            (1..=MAX_GLOBAL_WINDOW_DAYS).contains(&days),
            "analysis.global_window_days must be between 1 and {}, got {}",
            MAX_GLOBAL_WINDOW_DAYS,
            days
        );
        ensure!(
            self.analysis.threshold_multiplier.is_finite(),
            "analysis.threshold_multiplier must be finite"
        );
        Ok(())
    }

    /// An explicit path must load; otherwise fall back to [`Config::load_or_default`].
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Retirement horizon of the global table, in days.
    pub global_window_days: u32,
    /// `k` in `ceil(mean + k * std)`.
    pub threshold_multiplier: f64,
    /// Never advise below the historical maximum.
    pub conservative_floor: bool,
    /// Threshold for keys without a baseline.
    pub default_threshold: u64,
    /// Local entries with fewer distinct sub-items are never peaks.
    pub min_local_sub_count: u64,
    /// On cold start, build a first baseline from the preceding history.
    pub bootstrap: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            global_window_days: 7,
            threshold_multiplier: 3.0,
            conservative_floor: false,
            default_threshold: 0,
            min_local_sub_count: 0,
            bootstrap: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// JSON file, directory of JSON files, or SQLite database.
    pub input: PathBuf,
    /// Upper bound on fetching and building, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Json,
            input: PathBuf::from("telemetry.json"),
            fetch_timeout_secs: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Json,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Json,
            path: PathBuf::from("global_table.json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
