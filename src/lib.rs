//! Pixpress - image compression core
//!
//! Accepts uploaded images, re-encodes them with an external FFmpeg process
//! under a bounded concurrency gate, stores the results in a flat artifact
//! directory and sweeps them after a retention window.
//!
//! - **Formats**: closed registry of output formats and their FFmpeg flags
//! - **Executor**: time-bounded subprocess runs that never leak children
//! - **Storage**: artifact naming, traversal-safe lookup, best-effort cleanup
//! - **Orchestrator**: the compression pipeline and its concurrency gate
//! - **Sweeper**: periodic retention enforcement
//!
//! # Quick Start
//!
//! ```ignore
//! use pixpress::{Config, ImageService};
//!
//! let config = Config::load(None)?;
//! let service = ImageService::from_config(&config)?;
//! let result = service.compress(&bytes, "photo.jpg", Some(80), None).await?;
//! println!("{}", result.download_url);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::sync::Notify;

pub mod cli;
pub mod config;
pub mod errors;
pub mod executor;
pub mod formats;
pub mod orchestrator;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod telemetry;

pub use config::Config;
pub use errors::{PixpressError, Result};
pub use formats::{Format, FormatRegistry};
pub use orchestrator::{CompressionResult, Compressor};
pub use service::ImageService;
pub use storage::{ArtifactId, StorageManager};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn shutdown_notify() -> &'static Notify {
    static NOTIFY: OnceLock<Notify> = OnceLock::new();
    NOTIFY.get_or_init(Notify::new)
}

/// Set the global shutdown flag and wake anyone in [`wait_for_shutdown`].
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
    shutdown_notify().notify_waiters();
}

pub fn is_shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Resolve once [`request_shutdown`] has been called.
pub async fn wait_for_shutdown() {
    loop {
        let notified = shutdown_notify().notified();
        if is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}
