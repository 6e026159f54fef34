//! Subprocess Executor
//!
//! Runs the external compression tool with a discrete argument vector (never a
//! shell string), streams its output, and enforces a deadline. On timeout or
//! cancellation the whole process group is killed so nothing outlives the
//! concurrency slot that started it.

use crate::errors::ToolError;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Bytes of stdout/stderr kept per stream; older output is discarded.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Deadline for `-version` checks.
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to keep draining pipes after the process has exited.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of one tool invocation that ran to completion.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutput {
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub duration_ms: u64,
}

/// Something that can run the compression tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the tool with `args`. A nonzero exit is still `Ok`; check
    /// [`ExecutionOutput::success`]. Timeouts and spawn failures are errors.
    async fn execute(&self, args: &[String], timeout: Duration)
        -> Result<ExecutionOutput, ToolError>;

    /// Tool version string, or `None` if the tool cannot be run.
    async fn version(&self) -> Option<String>;

    async fn is_available(&self) -> bool {
        self.version().await.is_some()
    }
}

/// Runs FFmpeg (or whatever binary is configured in its place).
#[derive(Debug, Clone)]
pub struct FfmpegExecutor {
    tool: PathBuf,
    /// Optional wrapper the tool is launched through, e.g. `nice -n 10`.
    launcher: Vec<String>,
}

impl FfmpegExecutor {
    /// An empty `tool_path` resolves `ffmpeg` from `PATH`.
    pub fn new(tool_path: &str) -> Self {
        let tool = if tool_path.trim().is_empty() {
            PathBuf::from("ffmpeg")
        } else {
            PathBuf::from(tool_path)
        };
        Self {
            tool,
            launcher: Vec::new(),
        }
    }

    pub fn with_launcher(mut self, launcher: Vec<String>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = match self.launcher.split_first() {
            Some((program, launcher_args)) => {
                let mut cmd = Command::new(program);
                cmd.args(launcher_args).arg(&self.tool);
                cmd
            }
            None => Command::new(&self.tool),
        };
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        // Own process group, so a timeout can take out every descendant.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

#[async_trait]
impl ToolExecutor for FfmpegExecutor {
    async fn execute(
        &self,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecutionOutput, ToolError> {
        let start = Instant::now();
        let mut child = self.command(args).spawn().map_err(|e| {
            warn!(tool = %self.tool.display(), error = %e, "Failed to start compression tool");
            ToolError::Unavailable(format!("{}: {}", self.tool.display(), e))
        })?;

        let mut group = ProcessGroupGuard::new(child.id());
        debug!(pid = ?child.id(), args = args.len(), "Compression tool started");

        let stdout = child.stdout.take().map(|s| tokio::spawn(capture(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(capture(s)));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                // Kill stragglers still holding the pipes. The leader is
                // reaped, but its pid stays reserved while anything remains in
                // the group it leads. An empty group makes this ESRCH; hitting
                // a stranger needs the pid space to wrap and a new group
                // leader to take this id between the reap and this call.
                group.kill();
                let stdout = drain(stdout).await;
                let stderr = drain(stderr).await;
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(exit_code = ?status.code(), duration_ms, "Compression tool exited");
                Ok(ExecutionOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    success: status.success(),
                    duration_ms,
                })
            }
            Ok(Err(e)) => {
                group.kill();
                let _ = child.kill().await;
                Err(ToolError::Failed {
                    exit_code: None,
                    stderr: format!("failed to wait for tool: {}", e),
                })
            }
            Err(_) => {
                warn!(
                    pid = ?child.id(),
                    timeout_secs = timeout.as_secs(),
                    "Compression tool timed out, killing process group"
                );
                group.kill();
                // Reap the leader so it does not linger as a zombie.
                let _ = child.kill().await;
                for task in [stdout, stderr].into_iter().flatten() {
                    task.abort();
                }
                Err(ToolError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    async fn version(&self) -> Option<String> {
        let args = vec!["-version".to_string()];
        match self.execute(&args, VERSION_TIMEOUT).await {
            Ok(output) if output.success => {
                let version = parse_version(&output.stdout);
                info!(version = ?version, "Compression tool available");
                version
            }
            Ok(output) => {
                warn!(exit_code = ?output.exit_code, "Compression tool version check failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "Compression tool unavailable");
                None
            }
        }
    }
}

/// Extract the version from the first line of `ffmpeg -version`
/// (`ffmpeg version 6.1.1-3ubuntu5 Copyright ...`).
pub fn parse_version(stdout: &str) -> Option<String> {
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    let mut words = first.split_whitespace();
    while let Some(word) = words.next() {
        if word == "version" {
            return words.next().map(str::to_string);
        }
    }
    Some(first.to_string())
}

/// Read a pipe to EOF, keeping only the last [`MAX_CAPTURE_BYTES`].
async fn capture<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut kept: Vec<u8> = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                kept.extend_from_slice(&buf[..n]);
                if kept.len() > MAX_CAPTURE_BYTES {
                    let excess = kept.len() - MAX_CAPTURE_BYTES;
                    kept.drain(..excess);
                }
            }
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}

async fn drain(task: Option<tokio::task::JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(text)) => text,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

/// Kills the tool's process group when dropped while still armed, which is
/// what happens when the executing future is cancelled mid-run.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    // ESRCH just means the group is already empty.
    let _ = killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL);
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {
    // `kill_on_drop` covers the direct child; there is no group to signal.
}
