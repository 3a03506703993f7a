//! Configuration module for ratflow
//!
//! This module handles configuration for the runtime and the demo binary:
//! - Logging filter and optional log directory
//! - Supervisor identity and control tick
//! - Per-pipeline settings, keyed by pipeline name
//!
//! # Files
//!
//! Configuration is read from TOML (`.toml`) or JSON (`.json`), chosen by the
//! file extension. Without an explicit path, the platform config directory
//! is used:
//! - **Linux**: `~/.config/dev.hxyulin.ratflow/ratflow.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.ratflow/ratflow.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.ratflow\ratflow.toml`
//!
//! # Example
//!
//! ```ignore
//! use ratflow::config::AppConfig;
//!
//! let config = AppConfig::load_or_default("ratflow.toml");
//! let ingest = config.rat("ingest");
//! config.save("ratflow.json")?;
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.ratflow";

/// Default config filename
pub const CONFIG_FILE: &str = "ratflow.toml";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// On-disk encodings, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            other => Err(FlowError::Config(format!(
                "Unsupported config extension {:?} for {:?}",
                other, path
            ))),
        }
    }
}

/// Logging configuration for the binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set
    pub filter: String,

    /// Directory for daily rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,

    /// Log file name prefix
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,ratflow=debug".to_string(),
            log_dir: None,
            file_prefix: "ratflow.log".to_string(),
        }
    }
}

/// Parameters of the demo producer/consumer flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Interval between produced ticks
    pub tick_interval_ms: u64,

    /// Number of ticks to produce; unlimited when unset
    pub ticks: Option<u64>,

    /// Rhai script applied to each tick (`value` in scope)
    pub script: String,

    /// Delay the consumer spends per item, to show backpressure
    pub consumer_delay_ms: u64,

    /// Max-size limit of the queue between producer and consumer
    pub handoff_limit: i64,

    /// Total run time before shutdown
    pub run_secs: u64,

    /// Interval between printed status tables
    pub status_interval_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            ticks: None,
            script: "value * value".to_string(),
            consumer_delay_ms: 50,
            handoff_limit: 16,
            run_secs: 5,
            status_interval_ms: 1000,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,

    pub supervisor: SupervisorSettings,

    /// Per-pipeline overrides, keyed by pipeline name
    pub rats: BTreeMap<String, RatSettings>,

    pub demo: DemoConfig,
}

impl AppConfig {
    /// Load configuration from a `.toml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| {
                FlowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            }),
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| {
                FlowError::Config(format!("Failed to parse config file {:?}: {}", path, e))
            }),
        }
    }

    /// Load configuration, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path)? {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| FlowError::Serialization(format!("Failed to serialize config: {}", e)))?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| FlowError::Serialization(format!("Failed to serialize config: {}", e)))?,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                FlowError::Config(format!("Failed to create config directory {:?}: {}", dir, e))
            })?;
        }

        std::fs::write(path, content)
            .map_err(|e| FlowError::Config(format!("Failed to write config file {:?}: {}", path, e)))
    }

    /// Settings for pipeline `name`, falling back to defaults
    pub fn rat(&self, name: &str) -> RatSettings {
        self.rats.get(name).cloned().unwrap_or_default()
    }
}
