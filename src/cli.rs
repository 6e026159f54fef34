//! Command-line surface over [`ImageService`].

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::errors::PixpressError;
use crate::service::{HealthStatus, ImageService};
use crate::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "pixpress")]
#[command(about = "Compress images with FFmpeg and keep the results for a while")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress an image file
    Compress {
        /// Image to compress
        file: PathBuf,

        /// Quality 1-100 (default from config)
        #[arg(short, long, allow_hyphen_values = true)]
        quality: Option<i64>,

        /// Output format: jpeg, png, webp, bmp or original
        #[arg(short, long)]
        format: Option<String>,

        /// Also copy the compressed image here
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
    },
    /// Fetch a compressed image by identifier
    Fetch {
        id: String,

        /// Destination (defaults to the artifact's file name)
        #[arg(short, long, value_name = "OUT")]
        output: Option<PathBuf>,
    },
    /// Check that FFmpeg can be run
    Health,
    /// Delete expired artifacts now
    Sweep,
    /// Show the active limits
    Stats,
    /// Run the retention sweeper until interrupted
    Daemon,
}

fn expand_config_path(p: String) -> String {
    match p.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|h| h.join(rest).to_string_lossy().into_owned())
            .unwrap_or(p),
        None => p,
    }
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

/// Run one-shot work until it finishes or a shutdown signal arrives.
///
/// On shutdown the work future is dropped, which kills any tool process
/// group it started.
async fn until_shutdown<T>(work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        outcome = work => outcome,
        _ = crate::wait_for_shutdown() => {
            tracing::warn!("Shutdown requested, abandoning command");
            Err(PixpressError::Interrupted.into())
        }
    }
}

async fn copy_artifact(service: &ImageService, id: &str, dest: &Path) -> Result<u64> {
    let mut artifact = service.retrieve(id).await?;
    let mut out = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Cannot create {}", dest.display()))?;
    let written = tokio::io::copy(&mut artifact.file, &mut out)
        .await
        .with_context(|| format!("Cannot write {}", dest.display()))?;
    Ok(written)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.map(expand_config_path).as_deref())
        .map_err(|e| PixpressError::Config(format!("{:#}", e)))?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level, config.logging.json);

    let service = ImageService::from_config(&config)?;
    let json = cli.json;

    match cli.command {
        Commands::Compress {
            file,
            quality,
            format,
            output,
        } => {
            let result = until_shutdown(async {
                let bytes = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("Cannot read {}", file.display()))?;
                let hint = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                let result = service
                    .compress(&bytes, &hint, quality, format.as_deref())
                    .await?;

                if let Some(dest) = &output {
                    copy_artifact(&service, result.id.as_str(), dest).await?;
                }
                Ok::<_, anyhow::Error>(result)
            })
            .await?;

            emit(json, &result, |r| {
                if let Some(warning) = &r.warning {
                    eprintln!("warning: {}", warning);
                }
                println!("id:          {}", r.id);
                println!("format:      {} (quality {})", r.format, r.quality);
                println!(
                    "size:        {} -> {} bytes ({:.2}% smaller)",
                    r.original_size, r.compressed_size, r.compression_ratio
                );
                println!("duration:    {} ms", r.duration_ms);
                println!("download:    {}", r.download_url);
                if let Some(dest) = &output {
                    println!("written to:  {}", dest.display());
                }
            })?;
        }
        Commands::Fetch { id, output } => {
            let (dest, bytes) = until_shutdown(async {
                let dest = match output {
                    Some(p) => p,
                    None => {
                        let artifact = service.retrieve(&id).await?;
                        PathBuf::from(artifact.file_name)
                    }
                };
                let bytes = copy_artifact(&service, &id, &dest).await?;
                Ok::<_, anyhow::Error>((dest, bytes))
            })
            .await?;

            #[derive(Serialize)]
            struct Fetched {
                id: String,
                path: PathBuf,
                bytes: u64,
            }
            emit(json, &Fetched { id, path: dest, bytes }, |f| {
                println!("Wrote {} bytes to {}", f.bytes, f.path.display());
            })?;
        }
        Commands::Health => {
            let report = service.health().await;
            emit(json, &report, |r| {
                let status = match r.status {
                    HealthStatus::Healthy => "healthy",
                    HealthStatus::Degraded => "degraded",
                };
                println!("status:  {}", status);
                println!("ffmpeg:  {}", r.tool_version);
            })?;
        }
        Commands::Sweep => {
            let removed = service.sweep_now().await;
            emit(json, &serde_json::json!({ "removed": removed }), |_| {
                println!("Removed {} expired artifact(s)", removed);
            })?;
        }
        Commands::Stats => {
            let stats = service.stats();
            emit(json, &stats, |s| {
                println!("storage root:        {}", s.storage_root.display());
                println!("allowed formats:     {}", s.allowed_formats.join(", "));
                println!("default format:      {}", s.default_format);
                println!("default quality:     {}", s.default_quality);
                println!("max upload:          {} bytes", s.max_upload_bytes);
                println!("max concurrent:      {}", s.max_concurrent_operations);
                println!("tool timeout:        {} s", s.tool_timeout_secs);
                println!("retention:           {} min", s.retention_minutes);
                println!("sweep interval:      {} min", s.sweep_interval_minutes);
            })?;
        }
        Commands::Daemon => {
            let health = service.health().await;
            if health.status == HealthStatus::Degraded {
                tracing::warn!("Starting without a working FFmpeg");
            }
            let handle = service.start_sweeper();
            tracing::info!(root = %service.storage().root().display(), "Daemon running");
            crate::wait_for_shutdown().await;
            handle.shutdown().await;
        }
    }

    Ok(())
}
