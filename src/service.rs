//! Image service facade.
//!
//! Wires configuration into the compression core and exposes the operations
//! an outer surface (CLI, HTTP controller) calls.

use crate::config::Config;
use crate::errors::{PixpressError, Result};
use crate::executor::{FfmpegExecutor, ToolExecutor};
use crate::orchestrator::{CompressionResult, Compressor, CompressorSettings};
use crate::storage::{LocatedArtifact, StorageManager};
use crate::sweeper::{RetentionSweeper, SweeperHandle};
use crate::telemetry::{sanitize_for_log, track_operation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reported tool version when the version check fails.
pub const TOOL_UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub tool_available: bool,
    pub tool_version: String,
    pub checked_at: DateTime<Utc>,
}

/// Echo of the limits the service is running with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub storage_root: PathBuf,
    pub max_upload_bytes: u64,
    pub allowed_formats: Vec<String>,
    pub default_format: String,
    pub default_quality: u8,
    pub max_concurrent_operations: usize,
    pub in_flight: usize,
    pub tool_timeout_secs: u64,
    pub retention_minutes: u64,
    pub sweep_interval_minutes: u64,
}

pub struct ImageService {
    storage: Arc<StorageManager>,
    executor: Arc<dyn ToolExecutor>,
    compressor: Compressor,
    sweeper: RetentionSweeper,
}

impl ImageService {
    /// Build the service from validated configuration with the real FFmpeg
    /// executor.
    pub fn from_config(config: &Config) -> Result<Self> {
        let executor = FfmpegExecutor::new(&config.ffmpeg.path)
            .with_launcher(config.ffmpeg.launcher.clone());
        Self::with_executor(config, Arc::new(executor))
    }

    /// Build the service around any tool executor.
    pub fn with_executor(config: &Config, executor: Arc<dyn ToolExecutor>) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(StorageManager::new(&config.storage.root_dir));
        let compressor = Compressor::new(
            config.format_registry()?,
            storage.clone(),
            executor.clone(),
            CompressorSettings::from_config(config),
        );
        let sweeper = RetentionSweeper::new(
            storage.clone(),
            config.retention_window(),
            config.sweep_interval(),
        );
        debug!(root = %storage.root().display(), "Image service ready");
        Ok(Self {
            storage,
            executor,
            compressor,
            sweeper,
        })
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub async fn compress(
        &self,
        bytes: &[u8],
        file_name_hint: &str,
        quality: Option<i64>,
        requested_format: Option<&str>,
    ) -> Result<CompressionResult> {
        track_operation("compress", || {
            self.compressor
                .compress(bytes, file_name_hint, quality, requested_format)
        })
        .await
    }

    /// Open the compressed artifact for an untrusted identifier.
    ///
    /// Malformed and absent identifiers are both `NotFound`.
    pub async fn retrieve(&self, raw_id: &str) -> Result<LocatedArtifact> {
        match self.storage.locate(raw_id).await? {
            Some(artifact) => Ok(artifact),
            None => Err(PixpressError::NotFound {
                id: sanitize_for_log(raw_id),
            }),
        }
    }

    /// Never fails; a missing tool reports `degraded`.
    pub async fn health(&self) -> HealthReport {
        let version = self.executor.version().await;
        if version.is_none() {
            warn!("Compression tool is unavailable");
        }
        HealthReport {
            status: if version.is_some() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            tool_available: version.is_some(),
            tool_version: version.unwrap_or_else(|| TOOL_UNAVAILABLE.to_string()),
            checked_at: Utc::now(),
        }
    }

    pub async fn sweep_now(&self) -> usize {
        self.sweeper.sweep_once().await
    }

    pub fn stats(&self) -> ServiceStats {
        let settings = self.compressor.settings();
        let registry = self.compressor.registry();
        ServiceStats {
            storage_root: self.storage.root().to_path_buf(),
            max_upload_bytes: settings.max_upload_bytes,
            allowed_formats: registry
                .allowed()
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
            default_format: registry.default_format().name().to_string(),
            default_quality: settings.default_quality,
            max_concurrent_operations: settings.max_concurrent_operations,
            in_flight: self.compressor.in_flight(),
            tool_timeout_secs: settings.tool_timeout.as_secs(),
            retention_minutes: self.sweeper.retention().as_secs() / 60,
            sweep_interval_minutes: self.sweeper.interval().as_secs() / 60,
        }
    }

    pub fn start_sweeper(&self) -> SweeperHandle {
        self.sweeper.clone().spawn()
    }
}
