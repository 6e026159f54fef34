//! Telemetry & Observability
//!
//! Structured logging for the compression core.
//! - Human-readable or JSON output on stderr
//! - Level from config, overridden by `RUST_LOG` when set
//! - Control-character escaping for untrusted strings (tool stderr, ids)

use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Sanitize a string for safe log output by escaping control characters.
/// Prevents log injection where attackers embed newlines to forge log entries.
pub fn sanitize_for_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x1b' => out.push_str("\\e"),
            '\x00' => out.push_str("\\0"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once is a
/// no-op, so tests and the CLI can both call it freely.
pub fn init_tracing(level: &str, json: bool) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());
        let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("warn"));

        if json {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter_layer)
                .with(json_layer)
                .try_init();
        } else {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .with_level(true)
                .compact()
                .with_writer(std::io::stderr); // Write to stderr, not stdout

            let _ = tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .try_init();
        }
    });
}

/// Run `f` inside an `operation` span, logging its duration and outcome.
pub async fn track_operation<F, Fut, T, E>(operation: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let span = info_span!("operation", name = operation);

    async move {
        match f().await {
            Ok(result) => {
                info!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Operation completed"
                );
                Ok(result)
            }
            Err(e) => {
                let safe_err = sanitize_for_log(&e.to_string());
                error!(
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = safe_err.as_str(),
                    "Operation failed"
                );
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Initialize tracing for tests with a simple subscriber
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
