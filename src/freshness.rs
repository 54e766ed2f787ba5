//! New-Data Check
//!
//! Decides whether a batch run is worth starting by comparing the newest
//! model initialization upstream with the one the last successful run
//! processed. The last processed time lives in a small JSON marker
//! (`{"timestamp": "2025-01-28T00:00:00Z"}`) next to the batch output.
//!
//! When the upstream cannot be asked, the answer is "new data": a redundant
//! run is cheaper than a missed model cycle.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::{ForecastSource, SourceError};
use crate::logging::Component;
use crate::persist::{BatchOutput, PersistError};

// ============================================================================
// Marker
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub timestamp: DateTime<Utc>,
}

/// Reads the last processed time. A missing or unreadable marker counts as
/// "never processed".
pub fn read_marker(path: &Path) -> Option<DateTime<Utc>> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(component = %Component::Persist, path = %path.display(), "no processed marker found - first run");
            return None;
        }
        Err(e) => {
            tracing::warn!(component = %Component::Persist, path = %path.display(), "could not read processed marker: {}", e);
            return None;
        }
    };
    match serde_json::from_str::<ProcessedMarker>(&body) {
        Ok(marker) => Some(marker.timestamp),
        Err(e) => {
            tracing::warn!(component = %Component::Persist, path = %path.display(), "ignoring invalid processed marker: {}", e);
            None
        }
    }
}

pub fn write_marker(path: &Path, timestamp: DateTime<Utc>) -> Result<(), PersistError> {
    let io = |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io)?;
    }
    let body = serde_json::to_string(&ProcessedMarker { timestamp })?;
    fs::write(path, body).map_err(io)?;
    tracing::info!(component = %Component::Persist, path = %path.display(), %timestamp, "saved processed time");
    Ok(())
}

/// Records `output`'s init time as processed, unless an event failed or the
/// run had no init time. Returns whether the marker was written; a run with
/// failures leaves the marker alone so the next check reprocesses it.
pub fn mark_processed(path: &Path, output: &BatchOutput) -> Result<bool, PersistError> {
    let Some(init) = output.forecast_init_time else {
        return Ok(false);
    };
    if !output.events_failed.is_empty() {
        tracing::warn!(
            component = %Component::Persist,
            path = %path.display(),
            failed = ?output.events_failed,
            "not marking run as processed; it will be retried"
        );
        return Ok(false);
    }
    write_marker(path, init)?;
    Ok(true)
}

// ============================================================================
// Decision
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// A run should start. `commit_time` is the upstream init time when known.
    NewData { commit_time: Option<DateTime<Utc>> },
    UpToDate,
}

impl Freshness {
    pub fn is_new(&self) -> bool {
        matches!(self, Freshness::NewData { .. })
    }

    /// `KEY=value` lines for shell consumption.
    pub fn report_lines(&self) -> Vec<String> {
        match self {
            Freshness::NewData { commit_time } => {
                let mut lines = vec!["NEW_DATA=true".to_string()];
                if let Some(t) = commit_time {
                    lines.push(format!("COMMIT_TIME={}", t.to_rfc3339()));
                }
                lines
            }
            Freshness::UpToDate => vec!["NEW_DATA=false".to_string()],
        }
    }
}

/// Pure comparison of the marker against the upstream answer.
pub fn decide(
    last_processed: Option<DateTime<Utc>>,
    upstream: Result<Option<DateTime<Utc>>, SourceError>,
) -> Freshness {
    let latest = match upstream {
        Ok(latest) => latest,
        Err(e) => {
            tracing::error!(component = %Component::Source, "failed to get latest init time, processing anyway: {}", e);
            return Freshness::NewData { commit_time: None };
        }
    };
    match (last_processed, latest) {
        (_, None) => Freshness::NewData { commit_time: None },
        (None, Some(t)) => Freshness::NewData { commit_time: Some(t) },
        (Some(last), Some(t)) if t > last => Freshness::NewData { commit_time: Some(t) },
        (Some(_), Some(_)) => Freshness::UpToDate,
    }
}

pub fn check_new_data(source: &dyn ForecastSource, marker: &Path) -> Freshness {
    let last_processed = read_marker(marker);
    let freshness = decide(last_processed, source.latest_init_time());
    match &freshness {
        Freshness::NewData { .. } => tracing::info!(component = %Component::Source, "new data available"),
        Freshness::UpToDate => tracing::info!(component = %Component::Source, "no new data - skipping processing"),
    }
    freshness
}
