//! Logging infrastructure.
//!
//! Structured logging with dual output:
//! - A log file under the configured directory, cleared on run start
//! - Compact console output for live tailing
//! - Level control via the `RUST_LOG` environment variable
//!
//! Library code only emits `tracing` events; this module is where a
//! binary turns them into output.

use std::fs;
use std::io;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default log filename under the logging directory.
pub const DEFAULT_LOG_FILE: &str = "tilestitch.log";

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping this guard flushes and closes the log file writer.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

/// Initializes the global subscriber with a file layer and a console
/// layer.
///
/// Creates the log directory if needed and truncates any previous log
/// file, so each run's file starts clean. Call once per process; the
/// returned guard must outlive all logging.
///
/// # Errors
///
/// Returns an error when the log directory cannot be created or the
/// previous log file cannot be truncated.
pub fn init_logging(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    // Full multi-line detail goes to the file
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .pretty();

    // One line per event on the console, under the run summary output
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_ansi(true)
        .compact();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}
