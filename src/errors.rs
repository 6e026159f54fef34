use std::path::PathBuf;
use thiserror::Error;

use crate::telemetry::sanitize_for_log;

/// Maximum number of characters of tool stderr echoed back to a client.
pub const STDERR_EXCERPT_CHARS: usize = 512;

/// The central error type for pixpress.
///
/// Each variant maps onto one failure class of the compression core so the
/// orchestrator and its callers can make a single decision about what is
/// retryable and what is terminal.
#[derive(Error, Debug)]
pub enum PixpressError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Artifact not found: {id}")]
    NotFound { id: String },

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A shutdown signal arrived before the operation finished.
    #[error("Interrupted by shutdown signal")]
    Interrupted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Quality must be between 1 and 100, got {0}")]
    QualityOutOfRange(i64),

    #[error("Uploaded file is empty")]
    EmptyUpload,

    #[error("Uploaded file is {size} bytes, limit is {limit} bytes")]
    UploadTooLarge { size: u64, limit: u64 },

    #[error("Format '{0}' is not allowed")]
    DisallowedFormat(String),

    #[error("Malformed artifact identifier")]
    MalformedIdentifier,
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Compression tool unavailable: {0}")]
    Unavailable(String),

    #[error("Processing timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Compression failed with exit code {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path escapes storage root: {path}")]
    OutsideRoot { path: PathBuf },
}

impl StorageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, PixpressError>;

impl PixpressError {
    /// Stable machine-readable code for this failure.
    pub fn code(&self) -> &'static str {
        match self {
            PixpressError::Validation(_) => "VALIDATION_ERROR",
            PixpressError::NotFound { .. } => "NOT_FOUND",
            PixpressError::Tool(ToolError::Unavailable(_)) => "TOOL_UNAVAILABLE",
            PixpressError::Tool(ToolError::Timeout { .. }) => "PROCESSING_TIMEOUT",
            PixpressError::Tool(ToolError::Failed { .. }) => "COMPRESSION_FAILED",
            PixpressError::Storage(_) => "STORAGE_ERROR",
            PixpressError::Config(_) => "CONFIG_ERROR",
            PixpressError::Internal(_) => "INTERNAL_ERROR",
            PixpressError::Interrupted => "INTERRUPTED",
        }
    }

    /// Whether retrying the same request can reasonably succeed.
    ///
    /// Only timeouts qualify, and then with a smaller input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PixpressError::Tool(ToolError::Timeout { .. }))
    }

    /// Message that is safe to show an untrusted client.
    ///
    /// Storage paths and internal details never leave this function; tool
    /// stderr is already a bounded excerpt by the time it lands in
    /// [`ToolError::Failed`].
    pub fn client_message(&self) -> String {
        match self {
            PixpressError::Validation(e) => e.to_string(),
            PixpressError::NotFound { .. } => "Image not found or expired".to_string(),
            PixpressError::Tool(ToolError::Unavailable(_)) => {
                "Image processing is currently unavailable".to_string()
            }
            PixpressError::Tool(ToolError::Timeout { seconds }) => format!(
                "Processing exceeded {} seconds; try a smaller image",
                seconds
            ),
            PixpressError::Tool(ToolError::Failed { stderr, .. }) => {
                format!("Image compression failed: {}", stderr)
            }
            PixpressError::Storage(_) => "Failed to store the uploaded image".to_string(),
            PixpressError::Config(_) | PixpressError::Internal(_) => {
                "An unexpected error occurred".to_string()
            }
            PixpressError::Interrupted => "The service is shutting down".to_string(),
        }
    }
}

/// Reduce raw tool stderr to a bounded, control-character-free excerpt.
///
/// FFmpeg prints the actual error last, so the tail is kept.
pub fn stderr_excerpt(stderr: &str) -> String {
    let clean = sanitize_for_log(stderr.trim());
    let count = clean.chars().count();
    if count > STDERR_EXCERPT_CHARS {
        clean.chars().skip(count - STDERR_EXCERPT_CHARS).collect()
    } else {
        clean
    }
}

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_NOT_FOUND: u8 = 3;
pub const EXIT_VALIDATION_ERROR: u8 = 4;
pub const EXIT_TOOL_ERROR: u8 = 5;
pub const EXIT_STORAGE_ERROR: u8 = 6;
/// 128 + SIGINT, the status shells report for an interrupted command.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<PixpressError>() {
        return match err {
            PixpressError::Config(_) => EXIT_CONFIG_ERROR,
            PixpressError::NotFound { .. } => EXIT_NOT_FOUND,
            PixpressError::Validation(_) => EXIT_VALIDATION_ERROR,
            PixpressError::Tool(_) => EXIT_TOOL_ERROR,
            PixpressError::Storage(_) => EXIT_STORAGE_ERROR,
            PixpressError::Internal(_) => EXIT_ERROR,
            PixpressError::Interrupted => EXIT_INTERRUPTED,
        };
    }

    // Direct enum unwraps fallback
    if e.downcast_ref::<ValidationError>().is_some() {
        return EXIT_VALIDATION_ERROR;
    }
    if e.downcast_ref::<ToolError>().is_some() {
        return EXIT_TOOL_ERROR;
    }
    if e.downcast_ref::<StorageError>().is_some() {
        return EXIT_STORAGE_ERROR;
    }

    EXIT_ERROR
}
