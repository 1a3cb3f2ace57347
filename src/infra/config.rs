//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::{CheckpointStage, DwellPolicy};
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { base_url: default_base_url(), timeout_ms: default_timeout_ms() }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Max gap between wedge keystrokes before the buffer is discarded
    #[serde(default = "default_keystroke_idle_ms")]
    pub keystroke_idle_ms: u64,
    /// Delay between frame reads on the optical path
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_frame_channel_capacity")]
    pub frame_channel_capacity: usize,
    #[serde(default = "default_submission_queue_capacity")]
    pub submission_queue_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            keystroke_idle_ms: default_keystroke_idle_ms(),
            frame_interval_ms: default_frame_interval_ms(),
            frame_channel_capacity: default_frame_channel_capacity(),
            submission_queue_capacity: default_submission_queue_capacity(),
        }
    }
}

fn default_keystroke_idle_ms() -> u64 {
    100
}

fn default_frame_interval_ms() -> u64 {
    100 // 10 fps
}

fn default_frame_channel_capacity() -> usize {
    16
}

fn default_submission_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_file")]
    pub file: String,
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: default_cache_file(),
            namespace: default_cache_namespace(),
            capacity: default_cache_capacity(),
        }
    }
}

fn default_cache_file() -> String {
    "bagtrack-cache.json".to_string()
}

fn default_cache_namespace() -> String {
    "baggage_tracker_bags".to_string()
}

fn default_cache_capacity() -> usize {
    50
}

/// Scanner binding applied to captured scans
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScannerConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RiskConfig {
    /// Per-stage dwell threshold overrides, keyed by stage token
    #[serde(default)]
    pub dwell_minutes: HashMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    ledger_base_url: String,
    ledger_timeout_ms: u64,
    keystroke_idle_ms: u64,
    frame_interval_ms: u64,
    frame_channel_capacity: usize,
    submission_queue_capacity: usize,
    cache_file: String,
    cache_namespace: String,
    cache_capacity: usize,
    scanner_id: Option<String>,
    scanner_stage: Option<CheckpointStage>,
    scanner_location: Option<String>,
    dwell_overrides: HashMap<String, u64>,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

/// Blank strings in the file mean "not set"
fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        Self {
            ledger_base_url: toml_config.ledger.base_url.trim_end_matches('/').to_string(),
            ledger_timeout_ms: toml_config.ledger.timeout_ms,
            keystroke_idle_ms: toml_config.capture.keystroke_idle_ms,
            frame_interval_ms: toml_config.capture.frame_interval_ms,
            frame_channel_capacity: toml_config.capture.frame_channel_capacity.max(1),
            submission_queue_capacity: toml_config.capture.submission_queue_capacity.max(1),
            cache_file: toml_config.cache.file,
            cache_namespace: toml_config.cache.namespace,
            cache_capacity: toml_config.cache.capacity,
            scanner_id: non_blank(toml_config.scanner.id),
            scanner_stage: non_blank(toml_config.scanner.stage).map(|s| {
                // Infallible
                s.parse().unwrap_or(CheckpointStage::Unrecognized(s))
            }),
            scanner_location: non_blank(toml_config.scanner.location),
            dwell_overrides: toml_config.risk.dwell_minutes,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: source.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(Self::resolve_config_path(args))
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "config_fallback_to_defaults");
                Self::default()
            }
        }
    }

    /// Dwell thresholds with any per-stage overrides applied
    pub fn dwell_policy(&self) -> DwellPolicy {
        DwellPolicy::with_overrides(&self.dwell_overrides)
    }

    pub fn ledger_base_url(&self) -> &str {
        &self.ledger_base_url
    }

    pub fn ledger_timeout_ms(&self) -> u64 {
        self.ledger_timeout_ms
    }

    pub fn keystroke_idle_ms(&self) -> u64 {
        self.keystroke_idle_ms
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.frame_interval_ms
    }

    pub fn frame_channel_capacity(&self) -> usize {
        self.frame_channel_capacity
    }

    pub fn submission_queue_capacity(&self) -> usize {
        self.submission_queue_capacity
    }

    pub fn cache_file(&self) -> &str {
        &self.cache_file
    }

    pub fn cache_namespace(&self) -> &str {
        &self.cache_namespace
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn scanner_id(&self) -> Option<&str> {
        self.scanner_id.as_deref()
    }

    pub fn scanner_stage(&self) -> Option<&CheckpointStage> {
        self.scanner_stage.as_ref()
    }

    pub fn scanner_location(&self) -> Option<&str> {
        self.scanner_location.as_deref()
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
