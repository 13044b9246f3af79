//! # relay-logging
//!
//! Structured logging with `tracing`.
//!
//! Every crate in the workspace logs through `tracing` macros with structured
//! fields (`peer_id`, `address`, `form_name`, `reason`). This crate only sets
//! up the subscribers:
//!
//! - [`bootstrap_subscriber`]: warnings to stderr while settings are loading
//! - [`init_subscriber`]: the global subscriber, writing compact or JSON lines to
//!   stderr and optionally plain text to a log file
//!
//! `RUST_LOG` takes precedence over the configured level.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use relay_settings::{LogFormat, LoggingSettings};
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Errors raised while setting up log output.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log file's directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The log file path has no file name component.
    #[error("log file path {0} has no file name")]
    NoFileName(PathBuf),
    /// The file appender could not open the log file.
    #[error("failed to open log file: {0}")]
    Appender(#[from] InitError),
}

/// Keeps the background log-file writer alive. Drop it last; dropping flushes
/// buffered lines.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Build the level filter: `RUST_LOG` if set and valid, otherwise `level`,
/// otherwise `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Subscriber for the window before settings are loaded.
///
/// Use with [`tracing::subscriber::with_default`] so warnings about rejected
/// overrides reach stderr before the global subscriber exists.
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    fmt()
        .with_env_filter(build_filter("warn"))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .finish()
}

/// Open `path` for appending through a non-blocking writer, creating parent
/// directories as needed.
pub fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::NoFileName(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy())
        .build(dir)?;
    Ok(tracing_appender::non_blocking(appender))
}

fn build_layers(
    format: LogFormat,
    log_file: Option<&Path>,
) -> Result<(Vec<BoxedLayer>, LogGuard), LoggingError> {
    let stderr = match format {
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };
    let mut layers = vec![stderr];

    let mut guard = LogGuard::default();
    if let Some(path) = log_file {
        let (writer, worker) = file_writer(path)?;
        layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        guard._file = Some(worker);
    }
    Ok((layers, guard))
}

/// Initialize the global tracing subscriber.
///
/// Call once at application startup. Subsequent calls leave the first
/// subscriber in place. Keep the returned guard alive for the life of the
/// process when a log file is configured.
pub fn init_subscriber(
    level: &str,
    format: LogFormat,
    log_file: Option<&Path>,
) -> Result<LogGuard, LoggingError> {
    let (layers, guard) = build_layers(format, log_file)?;

    // try_init fails only if a global subscriber is already set
    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(level))
        .try_init();
    Ok(guard)
}

/// Initialize from loaded settings.
pub fn init_from_settings(settings: &LoggingSettings) -> Result<LogGuard, LoggingError> {
    init_subscriber(
        &settings.level,
        settings.format,
        settings.file.as_deref().map(Path::new),
    )
}
