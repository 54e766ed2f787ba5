/// Persisted batch output.
///
/// A batch run produces one merged document for all events. Per-cell timing
/// fields are stored as flat columns in `[latitude][longitude]` order, keyed
/// `"<event_id>_<field>"`:
///
/// - `freezing_first_breach_time`  ISO-8601 timestamp or null
/// - `freezing_duration_hours`     hours or null
/// - `freezing_next_breach_time`   ISO-8601 timestamp or null
/// - `freezing_next_duration_hours` hours or null
///
/// "No breach" is always an explicit null, never zero.
///
/// Sinks:
/// - `json`: the merged document on disk, written atomically.
/// - `postgres`: one row per cell per event in `whenwx.event_timing`.

pub mod json;
pub mod postgres;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::format::{ConfidenceBand, MODEL_CONSISTENCY_STUB, TimingView};
use crate::ingest::grid::{nearest_index, nearest_longitude_index};
use crate::model::GeoPoint;

pub const FIRST_BREACH_TIME: &str = "first_breach_time";
pub const DURATION_HOURS: &str = "duration_hours";
pub const NEXT_BREACH_TIME: &str = "next_breach_time";
pub const NEXT_DURATION_HOURS: &str = "next_duration_hours";

/// Per-event fields, in persisted order.
pub const FIELDS: [&str; 4] = [
    FIRST_BREACH_TIME,
    DURATION_HOURS,
    NEXT_BREACH_TIME,
    NEXT_DURATION_HOURS,
];

pub fn field_key(event_id: &str, field: &str) -> String {
    format!("{}_{}", event_id, field)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to access batch output {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid batch output document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Postgres(#[from] ::postgres::Error),
    #[error("batch output is missing field '{0}'")]
    MissingField(String),
    #[error("column '{key}' has {actual} cells, grid has {expected}")]
    ColumnLength {
        key: String,
        actual: usize,
        expected: usize,
    },
}

impl PersistError {
    /// `true` when the store could not be reached rather than holding bad data.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PersistError::Io { .. } | PersistError::Postgres(_))
    }
}

// ---------------------------------------------------------------------------
// Merged document
// ---------------------------------------------------------------------------

/// One cell value of a timing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Hours(f64),
    Time(String),
}

/// Merged output of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutput {
    pub title: String,
    pub data_source: String,
    pub forecast_init_time: Option<DateTime<Utc>>,
    pub processing_time: DateTime<Utc>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub events_processed: Vec<String>,
    pub events_failed: Vec<String>,
    pub fields: BTreeMap<String, Vec<Option<FieldValue>>>,
}

impl BatchOutput {
    pub fn new(
        title: &str,
        data_source: &str,
        forecast_init_time: Option<DateTime<Utc>>,
        processing_time: DateTime<Utc>,
        latitude: Vec<f64>,
        longitude: Vec<f64>,
    ) -> Self {
        Self {
            title: title.to_string(),
            data_source: data_source.to_string(),
            forecast_init_time,
            processing_time,
            latitude,
            longitude,
            events_processed: Vec::new(),
            events_failed: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.latitude.len() * self.longitude.len()
    }

    /// Adds the four timing columns of `event_id`, one view per cell.
    pub fn insert_event(&mut self, event_id: &str, cells: &[TimingView]) {
        let hours = |f: fn(&TimingView) -> Option<f64>| -> Vec<Option<FieldValue>> {
            cells.iter().map(|c| f(c).map(FieldValue::Hours)).collect()
        };
        let times = |f: fn(&TimingView) -> Option<String>| -> Vec<Option<FieldValue>> {
            cells.iter().map(|c| f(c).map(FieldValue::Time)).collect()
        };

        self.fields.insert(
            field_key(event_id, FIRST_BREACH_TIME),
            times(|c| c.first_breach_time.clone()),
        );
        self.fields
            .insert(field_key(event_id, DURATION_HOURS), hours(|c| c.duration_hours));
        self.fields.insert(
            field_key(event_id, NEXT_BREACH_TIME),
            times(|c| c.next_breach_time.clone()),
        );
        self.fields.insert(
            field_key(event_id, NEXT_DURATION_HOURS),
            hours(|c| c.next_duration_hours),
        );
        self.events_processed.push(event_id.to_string());
    }

    pub fn mark_failed(&mut self, event_id: &str) {
        self.events_failed.push(event_id.to_string());
    }

    pub fn has_event(&self, event_id: &str) -> bool {
        self.fields.contains_key(&field_key(event_id, FIRST_BREACH_TIME))
    }

    /// Checks every column against the grid shape.
    pub fn validate(&self) -> Result<(), PersistError> {
        let expected = self.cell_count();
        for (key, column) in &self.fields {
            if column.len() != expected {
                return Err(PersistError::ColumnLength {
                    key: key.clone(),
                    actual: column.len(),
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Nearest stored cell to `point`, as `(lat_idx, lon_idx)`.
    pub fn snap(&self, point: GeoPoint) -> Option<(usize, usize)> {
        if !point.latitude.is_finite() || !point.longitude.is_finite() {
            return None;
        }
        Some((
            nearest_index(&self.latitude, point.latitude)?,
            nearest_longitude_index(&self.longitude, point.longitude)?,
        ))
    }

    pub fn cell_point(&self, lat_idx: usize, lon_idx: usize) -> GeoPoint {
        GeoPoint::new(self.latitude[lat_idx], self.longitude[lon_idx])
    }

    /// Timing of `event_id` at a cell, read back from the columns.
    pub fn timing_at(
        &self,
        event_id: &str,
        lat_idx: usize,
        lon_idx: usize,
    ) -> Result<TimingView, PersistError> {
        let cell = lat_idx * self.longitude.len() + lon_idx;
        let value = |field: &str| -> Result<Option<FieldValue>, PersistError> {
            let key = field_key(event_id, field);
            let column = self
                .fields
                .get(&key)
                .ok_or_else(|| PersistError::MissingField(key.clone()))?;
            Ok(column.get(cell).cloned().flatten())
        };
        let time = |field: &str| -> Result<Option<String>, PersistError> {
            Ok(match value(field)? {
                Some(FieldValue::Time(t)) => Some(t),
                _ => None,
            })
        };
        let hours = |field: &str| -> Result<Option<f64>, PersistError> {
            Ok(match value(field)? {
                Some(FieldValue::Hours(h)) if h.is_finite() => Some(h),
                _ => None,
            })
        };

        Ok(TimingView {
            first_breach_time: time(FIRST_BREACH_TIME)?,
            duration_hours: hours(DURATION_HOURS)?,
            next_breach_time: time(NEXT_BREACH_TIME)?,
            next_duration_hours: hours(NEXT_DURATION_HOURS)?,
            model_consistency: MODEL_CONSISTENCY_STUB,
            confidence_band: ConfidenceBand::default(),
        })
    }
}
