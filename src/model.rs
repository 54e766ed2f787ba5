/// Core data types for the WhenWX event timing service.
///
/// This module defines the shared domain model imported by all other modules:
/// time offsets, sample series, threshold conditions, event timing results
/// and the error types raised while building them. It contains no I/O.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Absolute tolerance used by the `eq` operator.
pub const EQ_TOLERANCE: f64 = 1e-6;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

// ---------------------------------------------------------------------------
// Offsets
// ---------------------------------------------------------------------------

/// Time coordinate of a single sample.
///
/// Forecast grids index samples by lead time from the model initialization
/// (`Lead`); observational grids carry absolute timestamps (`Valid`). The
/// timing engine is agnostic to which, but resolving a breach to a wall-clock
/// instant needs the initialization time for `Lead` offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    Lead(Duration),
    Valid(DateTime<Utc>),
}

impl Offset {
    /// Lead-time offset from a fractional number of hours, rounded to the
    /// nearest millisecond. Saturates at the bounds of `Duration`; grids
    /// reject such leads on validation.
    pub fn lead_hours(hours: f64) -> Self {
        let millis = (hours * MILLIS_PER_HOUR).round() as i64;
        let lead = Duration::try_milliseconds(millis).unwrap_or(if millis < 0 {
            Duration::MIN
        } else {
            Duration::MAX
        });
        Offset::Lead(lead)
    }

    pub fn is_lead(&self) -> bool {
        matches!(self, Offset::Lead(_))
    }

    /// Hours elapsed from `self` to `later`. Returns `None` when the two
    /// offsets are of different kinds.
    pub fn hours_until(&self, later: &Offset) -> Option<f64> {
        let millis = match (self, later) {
            (Offset::Lead(a), Offset::Lead(b)) => {
                b.num_milliseconds() as f64 - a.num_milliseconds() as f64
            }
            (Offset::Valid(a), Offset::Valid(b)) => (*b - *a).num_milliseconds() as f64,
            _ => return None,
        };
        Some(millis / MILLIS_PER_HOUR)
    }

    /// Lead time in hours, for charting. `Valid` offsets are measured from
    /// `init_time` when one is known.
    pub fn as_lead_hours(&self, init_time: Option<DateTime<Utc>>) -> Option<f64> {
        match self {
            Offset::Lead(d) => Some(d.num_milliseconds() as f64 / MILLIS_PER_HOUR),
            Offset::Valid(t) => {
                init_time.map(|init| (*t - init).num_milliseconds() as f64 / MILLIS_PER_HOUR)
            }
        }
    }

    /// Wall-clock instant of this offset. `Lead` offsets need `init_time`,
    /// and resolve to `None` if the sum leaves chrono's date range.
    pub fn resolve(&self, init_time: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            Offset::Lead(d) => init_time.and_then(|init| init.checked_add_signed(*d)),
            Offset::Valid(t) => Some(*t),
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Lead(d) => write!(f, "+{}h", d.num_milliseconds() as f64 / MILLIS_PER_HOUR),
            Offset::Valid(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%M:%SZ")),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample series
// ---------------------------------------------------------------------------

/// One location's trajectory from one model run.
///
/// `values[i]` is `None` where the source had no usable sample. Offsets are
/// expected to be strictly increasing; the timing engine checks this.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSeries {
    pub offsets: Vec<Offset>,
    pub values: Vec<Option<f64>>,
}

impl SampleSeries {
    pub fn new(offsets: Vec<Offset>, values: Vec<Option<f64>>) -> Self {
        Self { offsets, values }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Iterates `(offset, value)` pairs in series order.
    pub fn samples(&self) -> impl Iterator<Item = (&Offset, Option<f64>)> {
        self.offsets.iter().zip(self.values.iter().copied())
    }
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// `latitude ∈ [-90, 90]`, `longitude ∈ [-180, 180]`, both finite.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Comparison operator of a threshold condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::Lte => "lte",
            Operator::Gte => "gte",
            Operator::Eq => "eq",
        }
    }
}

impl FromStr for Operator {
    type Err = InvalidOperator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" => Ok(Operator::Lt),
            "gt" => Ok(Operator::Gt),
            "lte" => Ok(Operator::Lte),
            "gte" => Ok(Operator::Gte),
            "eq" => Ok(Operator::Eq),
            other => Err(InvalidOperator(other.to_string())),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = InvalidOperator;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold predicate in native storage units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Condition {
    pub threshold: f64,
    pub operator: Operator,
}

impl Condition {
    pub fn new(threshold: f64, operator: Operator) -> Self {
        Self { threshold, operator }
    }
}

// ---------------------------------------------------------------------------
// Timing results
// ---------------------------------------------------------------------------

/// A maximal run of breaching samples. `end` is exclusive: the index of the
/// first non-breaching sample after the run, or the series length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Episode {
    pub start: usize,
    pub end: usize,
}

/// First and next breach of a condition over one series.
///
/// `None` means no such episode exists. Never mutated after construction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EventTiming {
    pub first_breach: Option<Offset>,
    pub first_duration_hours: Option<f64>,
    pub next_breach: Option<Offset>,
    pub next_duration_hours: Option<f64>,
}

impl EventTiming {
    /// Result for a series in which the condition never holds.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn has_breach(&self) -> bool {
        self.first_breach.is_some()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// An operator tag outside `lt`, `gt`, `lte`, `gte`, `eq`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid operator '{0}': expected one of lt, gt, lte, gte, eq")]
pub struct InvalidOperator(pub String);

/// The series handed to the timing engine violates its contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("cannot compute event timing over an empty series")]
    EmptySeries,
    #[error("mask has {mask} samples but series has {offsets} offsets")]
    LengthMismatch { mask: usize, offsets: usize },
    #[error("series offsets are not strictly increasing at index {index}")]
    UnorderedSeries { index: usize },
    #[error("series mixes lead-time and absolute offsets at index {index}")]
    MixedOffsetKinds { index: usize },
}
