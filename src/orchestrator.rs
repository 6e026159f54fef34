//! Compression Orchestrator
//!
//! Coordinates one compression job end to end: validate, store the original,
//! resolve the output format, run the tool behind the concurrency gate, measure
//! the result and clean up.
//!
//! ```text
//! bytes ──► validate ──► save original ──► build args ──► [gate] execute
//!                                                              │
//!          result ◄── delete original ◄── stat both ◄──────────┘
//! ```

use crate::config::Config;
use crate::errors::{stderr_excerpt, PixpressError, Result, ToolError, ValidationError};
use crate::executor::ToolExecutor;
use crate::formats::{Fallback, Format, FormatRegistry, Resolution};
use crate::storage::{sanitize_extension, ArtifactId, ArtifactKind, StorageManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Outcome of a successful compression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionResult {
    pub id: ArtifactId,
    pub original_size: u64,
    pub compressed_size: u64,
    /// `(1 - compressed/original) * 100`; negative when the output grew.
    pub compression_ratio: f64,
    pub format: Format,
    pub quality: u8,
    pub duration_ms: u64,
    pub download_url: String,
    pub created_at: DateTime<Utc>,
    /// Set when the requested format could not be honoured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Per-request bookkeeping; dropped once the job finishes.
#[derive(Debug)]
struct CompressionJob {
    id: ArtifactId,
    input: PathBuf,
    output: PathBuf,
    quality: u8,
    resolution: Resolution,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Knobs the orchestrator needs from configuration.
#[derive(Debug, Clone)]
pub struct CompressorSettings {
    pub default_quality: u8,
    pub max_upload_bytes: u64,
    pub max_concurrent_operations: usize,
    pub tool_timeout: Duration,
    pub download_prefix: String,
}

impl CompressorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_quality: config.compression.default_quality,
            max_upload_bytes: config.compression.max_upload_bytes,
            max_concurrent_operations: config.compression.max_concurrent_operations,
            tool_timeout: config.tool_timeout(),
            download_prefix: config.storage.download_prefix.clone(),
        }
    }
}

/// `(1 - compressed/original) * 100`. An empty original yields 0.
pub fn compression_ratio(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - compressed as f64 / original as f64) * 100.0
}

pub struct Compressor {
    registry: FormatRegistry,
    storage: Arc<StorageManager>,
    executor: Arc<dyn ToolExecutor>,
    gate: Arc<Semaphore>,
    settings: CompressorSettings,
}

impl Compressor {
    pub fn new(
        registry: FormatRegistry,
        storage: Arc<StorageManager>,
        executor: Arc<dyn ToolExecutor>,
        settings: CompressorSettings,
    ) -> Self {
        let gate = Arc::new(Semaphore::new(settings.max_concurrent_operations.max(1)));
        Self {
            registry,
            storage,
            executor,
            gate,
            settings,
        }
    }

    pub fn registry(&self) -> &FormatRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &CompressorSettings {
        &self.settings
    }

    /// Tool invocations currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.settings
            .max_concurrent_operations
            .max(1)
            .saturating_sub(self.gate.available_permits())
    }

    /// Compress an uploaded image.
    ///
    /// `quality` defaults to the configured value and must be 1-100.
    /// `requested_format` may be absent, a format name, or `original`.
    /// Callers beyond the concurrency limit wait for a slot.
    pub async fn compress(
        &self,
        bytes: &[u8],
        file_name_hint: &str,
        quality: Option<i64>,
        requested_format: Option<&str>,
    ) -> Result<CompressionResult> {
        let quality = self.validate_quality(quality)?;
        self.validate_upload(bytes)?;

        let source_ext = sanitize_extension(file_name_hint);
        let resolution = self.resolve_allowed(requested_format, &source_ext)?;

        let id = ArtifactId::generate();
        let span = info_span!("compress", id = %id, format = %resolution.format);

        async move {
            let input = self
                .storage
                .save(&mut &bytes[..], &id, ArtifactKind::Original, &source_ext)
                .await?;
            let output = self.storage.path_for(
                &id,
                ArtifactKind::Compressed,
                self.registry.extension_for(resolution.format),
            );

            let job = CompressionJob {
                id,
                input,
                output,
                quality,
                resolution,
                started: Instant::now(),
                started_at: Utc::now(),
            };
            self.run(job, bytes.len() as u64).await
        }
        .instrument(span)
        .await
    }

    fn validate_quality(&self, quality: Option<i64>) -> Result<u8> {
        match quality {
            None => Ok(self.settings.default_quality),
            Some(q) if (1..=100).contains(&q) => Ok(q as u8),
            Some(q) => Err(ValidationError::QualityOutOfRange(q).into()),
        }
    }

    fn validate_upload(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(ValidationError::EmptyUpload.into());
        }
        let size = bytes.len() as u64;
        if size > self.settings.max_upload_bytes {
            return Err(ValidationError::UploadTooLarge {
                size,
                limit: self.settings.max_upload_bytes,
            }
            .into());
        }
        Ok(())
    }

    /// Resolve the output format and apply the operator's allow-list.
    ///
    /// A disabled format the caller asked for by name is rejected. A disabled
    /// format inferred from the upload falls back to the default.
    fn resolve_allowed(&self, requested: Option<&str>, source_ext: &str) -> Result<Resolution> {
        let resolution = self.registry.resolve(requested, source_ext);
        if self.registry.is_allowed(resolution.format) {
            return Ok(resolution);
        }
        if resolution.explicit {
            return Err(ValidationError::DisallowedFormat(resolution.format.to_string()).into());
        }

        let default = self.registry.default_format();
        if !self.registry.is_allowed(default) {
            return Err(ValidationError::DisallowedFormat(default.to_string()).into());
        }
        warn!(
            format = %resolution.format,
            default = %default,
            "Inferred format is disabled, using default"
        );
        Ok(Resolution {
            format: default,
            fallback: Some(resolution.fallback.unwrap_or(Fallback::Disabled(resolution.format))),
            explicit: false,
        })
    }

    async fn run(&self, job: CompressionJob, original_size: u64) -> Result<CompressionResult> {
        let args = self.registry.arguments_for(
            job.resolution.format,
            job.quality,
            &job.input,
            &job.output,
        );

        let output = {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| PixpressError::Internal("concurrency gate closed".into()))?;
            debug!(in_flight = self.in_flight(), "Acquired compression slot");
            self.executor.execute(&args, self.settings.tool_timeout).await
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                // Original stays on disk for inspection or retry.
                match &e {
                    ToolError::Timeout { seconds } => {
                        error!(timeout_secs = seconds, "Compression timed out")
                    }
                    other => error!(error = %other, "Compression tool could not run"),
                }
                self.discard_partial(&job).await;
                return Err(e.into());
            }
        };

        if !output.success {
            let stderr = stderr_excerpt(&output.stderr);
            error!(exit_code = ?output.exit_code, stderr = %stderr, "Compression failed");
            self.discard_partial(&job).await;
            return Err(ToolError::Failed {
                exit_code: output.exit_code,
                stderr,
            }
            .into());
        }

        let compressed_size = match self.storage.size_of(&job.output).await {
            Ok(size) => size,
            Err(e) => {
                error!(error = %e, "Tool exited cleanly but produced no output");
                return Err(ToolError::Failed {
                    exit_code: output.exit_code,
                    stderr: "no output file was produced".into(),
                }
                .into());
            }
        };

        // Cleanup is best-effort; a leftover original is swept later.
        self.storage.delete(&job.input).await;

        let ratio = compression_ratio(original_size, compressed_size);
        let duration_ms = job.started.elapsed().as_millis() as u64;
        info!(
            original_size,
            compressed_size,
            ratio = %format!("{:.2}", ratio),
            duration_ms,
            quality = job.quality,
            "Compression completed"
        );

        Ok(CompressionResult {
            download_url: format!(
                "{}/{}",
                self.settings.download_prefix.trim_end_matches('/'),
                job.id
            ),
            id: job.id,
            original_size,
            compressed_size,
            compression_ratio: ratio,
            format: job.resolution.format,
            quality: job.quality,
            duration_ms,
            created_at: job.started_at,
            warning: job.resolution.fallback.map(|f| f.to_string()),
        })
    }

    async fn discard_partial(&self, job: &CompressionJob) {
        if tokio::fs::try_exists(&job.output).await.unwrap_or(false) {
            self.storage.delete(&job.output).await;
        }
    }
}
