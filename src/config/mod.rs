//! Configuration Management
//!
//! Loads service configuration from TOML files with environment overrides.
//! Configuration includes:
//! - Storage location and download locator prefix
//! - Compression limits (quality, upload size, formats, concurrency)
//! - FFmpeg location and timeout
//! - Retention window and sweep interval
//! - Logging level and format
//!
//! Values are handed to each component's constructor; nothing in the core
//! reads configuration from global state.

use crate::errors::PixpressError;
use crate::formats::{Format, FormatRegistry};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for the retention window and the sweep interval (one year).
pub const MAX_RETENTION_MINUTES: u64 = 366 * 24 * 60;
/// Upper bound for a single tool invocation (one day).
pub const MAX_TOOL_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub ffmpeg: FfmpegConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Flat directory holding every artifact.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Prepended to the identifier to form the download locator.
    #[serde(default = "default_download_prefix")]
    pub download_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_quality")]
    pub default_quality: u8,
    /// Used when the requested format or source extension is unknown.
    #[serde(default = "default_format")]
    pub default_format: String,
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    #[serde(default = "default_max_concurrent_operations")]
    pub max_concurrent_operations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegConfig {
    /// Empty means resolve `ffmpeg` from PATH.
    #[serde(default)]
    pub path: String,
    /// Optional wrapper command, e.g. `["nice", "-n", "10"]`.
    #[serde(default)]
    pub launcher: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_minutes")]
    pub retention_minutes: u64,
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            download_prefix: default_download_prefix(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            default_quality: default_quality(),
            default_format: default_format(),
            allowed_formats: default_allowed_formats(),
            max_upload_bytes: default_max_upload_bytes(),
            max_concurrent_operations: default_max_concurrent_operations(),
        }
    }
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            launcher: Vec::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_minutes: default_retention_minutes(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("./storage/images")
}
fn default_download_prefix() -> String {
    "/api/image/download".to_string()
}
fn default_quality() -> u8 {
    80
}
fn default_format() -> String {
    "jpeg".to_string()
}
fn default_allowed_formats() -> Vec<String> {
    Format::ALL.iter().map(|f| f.name().to_string()).collect()
}
fn default_max_upload_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_concurrent_operations() -> usize {
    5
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_retention_minutes() -> u64 {
    30
}
fn default_sweep_interval_minutes() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config: Config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config from {}", p))?;
                toml::from_str(&content).context("Failed to parse config")?
            }
            None => {
                let mut candidates = vec![PathBuf::from("pixpress.toml")];
                if let Some(home) = dirs::home_dir() {
                    candidates.push(home.join(".config/pixpress/config.toml"));
                }

                let mut loaded = None;
                for p in &candidates {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).with_context(|| {
                            format!("Failed to parse config {}", p.display())
                        })?);
                        break;
                    }
                }
                loaded.unwrap_or_default()
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Override file values with `PIXPRESS_*` environment variables.
    /// Unparseable numeric values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("PIXPRESS_STORAGE_DIR") {
            self.storage.root_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("PIXPRESS_FFMPEG_PATH") {
            self.ffmpeg.path = path;
        }
        if let Ok(launcher) = std::env::var("PIXPRESS_FFMPEG_LAUNCHER") {
            self.ffmpeg.launcher = launcher.split_whitespace().map(String::from).collect();
        }
        if let Ok(timeout) = std::env::var("PIXPRESS_FFMPEG_TIMEOUT") {
            if let Ok(t) = timeout.parse::<u64>() {
                self.ffmpeg.timeout_secs = t;
            }
        }
        if let Ok(max) = std::env::var("PIXPRESS_MAX_CONCURRENT") {
            if let Ok(n) = max.parse::<usize>() {
                self.compression.max_concurrent_operations = n;
            }
        }
        if let Ok(quality) = std::env::var("PIXPRESS_DEFAULT_QUALITY") {
            if let Ok(q) = quality.parse::<u8>() {
                self.compression.default_quality = q;
            }
        }
        if let Ok(minutes) = std::env::var("PIXPRESS_RETENTION_MINUTES") {
            if let Ok(m) = minutes.parse::<u64>() {
                self.retention.retention_minutes = m;
            }
        }
        if let Ok(minutes) = std::env::var("PIXPRESS_SWEEP_INTERVAL_MINUTES") {
            if let Ok(m) = minutes.parse::<u64>() {
                self.retention.sweep_interval_minutes = m;
            }
        }
        if let Ok(level) = std::env::var("PIXPRESS_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> std::result::Result<(), PixpressError> {
        let c = &self.compression;
        if !(1..=100).contains(&c.default_quality) {
            return Err(PixpressError::Config(format!(
                "compression.default_quality must be 1-100, got {}",
                c.default_quality
            )));
        }
        if c.max_concurrent_operations == 0 {
            return Err(PixpressError::Config(
                "compression.max_concurrent_operations must be at least 1".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(PixpressError::Config(
                "compression.max_upload_bytes must be greater than 0".into(),
            ));
        }
        if c.allowed_formats.is_empty() {
            return Err(PixpressError::Config(
                "compression.allowed_formats must not be empty".into(),
            ));
        }
        self.allowed_formats()?;
        self.default_format()?;
        if !(1..=MAX_TOOL_TIMEOUT_SECS).contains(&self.ffmpeg.timeout_secs) {
            return Err(PixpressError::Config(format!(
                "ffmpeg.timeout_secs must be 1-{}, got {}",
                MAX_TOOL_TIMEOUT_SECS, self.ffmpeg.timeout_secs
            )));
        }
        let r = &self.retention;
        if r.retention_minutes > MAX_RETENTION_MINUTES {
            return Err(PixpressError::Config(format!(
                "retention.retention_minutes must be at most {}, got {}",
                MAX_RETENTION_MINUTES, r.retention_minutes
            )));
        }
        if !(1..=MAX_RETENTION_MINUTES).contains(&r.sweep_interval_minutes) {
            return Err(PixpressError::Config(format!(
                "retention.sweep_interval_minutes must be 1-{}, got {}",
                MAX_RETENTION_MINUTES, r.sweep_interval_minutes
            )));
        }
        Ok(())
    }

    pub fn allowed_formats(&self) -> std::result::Result<Vec<Format>, PixpressError> {
        let mut formats = Vec::new();
        for name in &self.compression.allowed_formats {
            let format = Format::from_name(name).ok_or_else(|| {
                PixpressError::Config(format!("unknown format in allowed_formats: {}", name))
            })?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Ok(formats)
    }

    pub fn default_format(&self) -> std::result::Result<Format, PixpressError> {
        Format::from_name(&self.compression.default_format).ok_or_else(|| {
            PixpressError::Config(format!(
                "unknown default_format: {}",
                self.compression.default_format
            ))
        })
    }

    pub fn format_registry(&self) -> std::result::Result<FormatRegistry, PixpressError> {
        Ok(FormatRegistry::new(
            self.allowed_formats()?,
            self.default_format()?,
        ))
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.ffmpeg.timeout_secs)
    }

    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention.retention_minutes.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_minutes.saturating_mul(60))
    }
}
