//! In-memory forecast grid.
//!
//! A `ForecastDataset` is one snapshot of the upstream gridded source: a
//! latitude axis, a longitude axis, and one or more model runs. Each run has
//! its own time axis and a set of variables stored as flat arrays in
//! `[time][latitude][longitude]` order. `null` values in the JSON document
//! are missing samples.
//!
//! ```json
//! {
//!   "latitude": [50.0, 50.25],
//!   "longitude": [-1.0, -0.75, -0.5],
//!   "runs": [{
//!     "init_time": "2025-01-28T00:00:00Z",
//!     "time": { "lead_hours": [0, 3, 6] },
//!     "variables": { "2t": [270.1, 269.8, null, ...] }
//!   }]
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SourceError;
use crate::model::Offset;

/// Largest accepted lead time, ten years. Forecast leads are days to months.
pub const MAX_LEAD_HOURS: f64 = 24.0 * 366.0 * 10.0;

/// Time coordinate of a model run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAxis {
    /// Lead time from `init_time`, in hours.
    LeadHours(Vec<f64>),
    /// Absolute valid times, for observational grids.
    ValidTimes(Vec<DateTime<Utc>>),
}

impl TimeAxis {
    pub fn len(&self) -> usize {
        match self {
            TimeAxis::LeadHours(h) => h.len(),
            TimeAxis::ValidTimes(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offsets(&self) -> Vec<Offset> {
        match self {
            TimeAxis::LeadHours(hours) => hours.iter().map(|h| Offset::lead_hours(*h)).collect(),
            TimeAxis::ValidTimes(times) => times.iter().map(|t| Offset::Valid(*t)).collect(),
        }
    }
}

/// One model initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRun {
    /// `None` for observational grids that are not anchored to a model run.
    #[serde(default)]
    pub init_time: Option<DateTime<Utc>>,
    pub time: TimeAxis,
    pub variables: BTreeMap<String, Vec<Option<f64>>>,
}

impl ForecastRun {
    /// Lead hours must be finite, within `MAX_LEAD_HOURS`, and resolve to a
    /// representable instant from `init_time`.
    fn validate_time_axis(&self) -> Result<(), SourceError> {
        let TimeAxis::LeadHours(hours) = &self.time else {
            return Ok(());
        };
        for (i, h) in hours.iter().enumerate() {
            if !h.is_finite() || h.abs() > MAX_LEAD_HOURS {
                return Err(SourceError::Malformed(format!(
                    "lead hour {} at step {} is outside +/-{} h",
                    h, i, MAX_LEAD_HOURS
                )));
            }
            if self.init_time.is_some() && Offset::lead_hours(*h).resolve(self.init_time).is_none() {
                return Err(SourceError::Malformed(format!(
                    "lead hour {} at step {} overflows the init time",
                    h, i
                )));
            }
        }
        Ok(())
    }
}

/// A snapshot of the upstream forecast grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDataset {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source: String,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub runs: Vec<ForecastRun>,
}

impl ForecastDataset {
    pub fn from_json(body: &str) -> Result<Self, SourceError> {
        let dataset: ForecastDataset = serde_json::from_str(body)?;
        dataset.validate()?;
        Ok(dataset)
    }

    /// Checks that every variable array matches the grid shape of its run.
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.latitude.is_empty() || self.longitude.is_empty() {
            return Err(SourceError::Malformed(
                "latitude and longitude axes must be non-empty".to_string(),
            ));
        }
        if self.runs.is_empty() {
            return Err(SourceError::NoRuns);
        }
        let cells = self.cell_count();
        for run in &self.runs {
            run.validate_time_axis()?;
            let expected = run.time.len() * cells;
            for (name, values) in &run.variables {
                if values.len() != expected {
                    return Err(SourceError::Malformed(format!(
                        "variable '{}' has {} values, expected {} ({} steps x {} x {})",
                        name,
                        values.len(),
                        expected,
                        run.time.len(),
                        self.latitude.len(),
                        self.longitude.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.latitude.len() * self.longitude.len()
    }

    /// The run with the latest initialization time. Runs without an init
    /// time sort before any that have one.
    pub fn latest_run(&self) -> Option<&ForecastRun> {
        self.runs.iter().max_by_key(|r| r.init_time)
    }

    pub fn latest_init_time(&self) -> Option<DateTime<Utc>> {
        self.latest_run().and_then(|r| r.init_time)
    }

    /// Provenance label for responses and batch output, `fallback` when the
    /// document does not name its source.
    pub fn source_label<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.source.trim().is_empty() {
            fallback
        } else {
            &self.source
        }
    }

    /// Names of the variables carried by the latest run.
    pub fn variable_names(&self) -> Vec<&str> {
        self.latest_run()
            .map(|r| r.variables.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Nearest-point snapping
// ---------------------------------------------------------------------------

/// Index of the coordinate closest to `target`. Ties go to the lower index;
/// non-finite coordinates are never selected.
pub fn nearest_index(coords: &[f64], target: f64) -> Option<usize> {
    nearest_by(coords, |c| (c - target).abs())
}

/// Like `nearest_index`, but distances wrap around 360°, so a grid stored
/// as `0..360` still matches a `-180..180` query.
pub fn nearest_longitude_index(coords: &[f64], target: f64) -> Option<usize> {
    nearest_by(coords, |c| {
        let d = (c - target).abs() % 360.0;
        d.min(360.0 - d)
    })
}

fn nearest_by(coords: &[f64], distance: impl Fn(f64) -> f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, c) in coords.iter().enumerate() {
        if !c.is_finite() {
            continue;
        }
        let d = distance(*c);
        if best.is_none_or(|(_, best_d)| d < best_d) {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}
