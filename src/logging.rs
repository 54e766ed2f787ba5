/// Structured logging for the event timing service
///
/// Thin layer over `tracing`: every event carries a `component` field so log
/// lines from the cache, the batch run and the query server can be told
/// apart, and query failures are classified before they are logged so that
/// a bad request does not page anyone while an upstream outage does.
///
/// Console output goes to stderr. An optional log file receives the same
/// events without ANSI colours, appended across restarts.

use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt as fmt_layer;
use tracing_subscriber::prelude::*;

use crate::query::QueryError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Value of the `component` field attached to every log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Source,
    Cache,
    Engine,
    Batch,
    Query,
    Server,
    Persist,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Source => "source",
            Component::Cache => "cache",
            Component::Engine => "engine",
            Component::Batch => "batch",
            Component::Query => "query",
            Component::Server => "server",
            Component::Persist => "persist",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// The request itself was wrong: unknown event, bad coordinate.
    Configuration,
    /// The data violated its contract: missing variable, unordered series.
    Data,
    /// The upstream source could not be reached or timed out.
    Upstream,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Configuration => write!(f, "CONFIGURATION"),
            FailureType::Data => write!(f, "DATA"),
            FailureType::Upstream => write!(f, "UPSTREAM"),
        }
    }
}

pub fn classify_query_failure(err: &QueryError) -> FailureType {
    match err {
        QueryError::UnknownEvent { .. }
        | QueryError::InvalidCoordinate { .. }
        | QueryError::Source(crate::ingest::SourceError::NearestPoint { .. }) => {
            FailureType::Configuration
        }
        QueryError::Timeout { .. } => FailureType::Upstream,
        QueryError::Source(source) if source.is_unavailable() => FailureType::Upstream,
        QueryError::Persist(persist) if persist.is_unavailable() => FailureType::Upstream,
        _ => FailureType::Data,
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `min_level` when set. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&str>,
    console_timestamps: bool,
) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(min_level.as_filter()));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt_layer::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    let timed_console = console_timestamps.then(|| {
        fmt_layer::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let plain_console = (!console_timestamps).then(|| {
        fmt_layer::layer()
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(timed_console)
        .with(plain_console)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!(component = %Component::Server, "logger already initialized");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Logs a failed query at a level matching its classification.
pub fn log_query_failure(event_id: &str, latitude: f64, longitude: f64, err: &QueryError) {
    let failure_type = classify_query_failure(err);
    match failure_type {
        FailureType::Configuration => tracing::warn!(
            component = %Component::Query,
            event_id,
            latitude,
            longitude,
            failure = %failure_type,
            "query rejected: {}",
            err
        ),
        FailureType::Data | FailureType::Upstream => tracing::error!(
            component = %Component::Query,
            event_id,
            latitude,
            longitude,
            failure = %failure_type,
            "query failed: {}",
            err
        ),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Logs the outcome of a batch run over `total` events.
pub fn log_batch_summary(total: usize, successful: usize, failed: &[String]) {
    let message = format!(
        "Batch complete: {}/{} events successful, {} failed",
        successful,
        total,
        failed.len()
    );

    if failed.is_empty() {
        tracing::info!(component = %Component::Batch, "{}", message);
    } else if successful == 0 {
        tracing::error!(component = %Component::Batch, failed = ?failed, "{}", message);
    } else {
        tracing::warn!(component = %Component::Batch, failed = ?failed, "{}", message);
    }
}
