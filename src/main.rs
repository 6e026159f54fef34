use std::process::ExitCode;
use std::time::Duration;

use pixpress::errors::PixpressError;

/// How long a command may keep unwinding after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    tokio::spawn(async {
        shutdown_signal().await;
        eprintln!("\nReceived shutdown signal, stopping...");
        pixpress::request_shutdown();
    });

    // One-shot commands race their own work against the shutdown flag and
    // the daemon waits on it, so both normally return well inside the grace
    // period. Past it the command future is dropped rather than the process
    // exited, so drop guards still kill any tool process group.
    let outcome = tokio::select! {
        outcome = pixpress::cli::run() => outcome,
        _ = grace_expired() => {
            eprintln!("Shutdown grace period expired, abandoning command.");
            Err(PixpressError::Interrupted.into())
        }
    };

    match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(pixpress::errors::get_exit_code(&e))
        }
    }
}

async fn grace_expired() {
    pixpress::wait_for_shutdown().await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
