/// Display formatting for query responses and persisted batch output.
///
/// The engine works in storage units and `Offset`s; API consumers see
/// ISO-8601 UTC timestamps, durations in hours, and values in display units
/// (°C rather than K). Every response, on-demand or precomputed, is built
/// through `render` so both modes share one response type; a
/// `FormatProfile` decides which optional fields are filled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventDefinition;
use crate::model::{EventTiming, GeoPoint, Offset, SampleSeries};
use crate::variables;

/// `%Y-%m-%dT%H:%M:%SZ`, e.g. `2025-01-28T06:00:00Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Placeholder until confidence is computed from multiple model runs.
pub const MODEL_CONSISTENCY_STUB: f64 = 0.75;

pub const DEFAULT_DATA_SOURCE: &str = "ECMWF IFS 15-day forecast";

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.format(TIMESTAMP_FORMAT).to_string()
}

/// Wall-clock rendering of an offset. A lead offset without an init time
/// cannot be resolved and is rendered relative, e.g. `+6h`.
pub fn format_offset(offset: &Offset, init_time: Option<DateTime<Utc>>) -> String {
    match offset.resolve(init_time) {
        Some(t) => format_timestamp(t),
        None => offset.to_string(),
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Response views
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub earliest: Option<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingView {
    pub first_breach_time: Option<String>,
    pub duration_hours: Option<f64>,
    pub next_breach_time: Option<String>,
    pub next_duration_hours: Option<f64>,
    pub model_consistency: f64,
    pub confidence_band: ConfidenceBand,
}

impl TimingView {
    /// View with no breach at all.
    pub fn never() -> Self {
        format_timing(&EventTiming::never(), None)
    }
}

pub fn format_timing(timing: &EventTiming, init_time: Option<DateTime<Utc>>) -> TimingView {
    TimingView {
        first_breach_time: timing.first_breach.map(|o| format_offset(&o, init_time)),
        duration_hours: timing.first_duration_hours,
        next_breach_time: timing.next_breach.map(|o| format_offset(&o, init_time)),
        next_duration_hours: timing.next_duration_hours,
        model_consistency: MODEL_CONSISTENCY_STUB,
        confidence_band: ConfidenceBand::default(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesView {
    pub lead_times_hours: Vec<f64>,
    pub values: Vec<f64>,
    pub unit: String,
}

/// Charting view of a series: values converted to display units and rounded
/// to 2 decimals. Missing and non-finite samples are dropped together with
/// their lead time, so `values` never contains a gap marker.
pub fn format_series(
    series: &SampleSeries,
    variable: &str,
    unit: &str,
    init_time: Option<DateTime<Utc>>,
) -> SeriesView {
    let conversion = variables::conversion_for(variable);
    let (lead_times_hours, values) = series
        .samples()
        .filter_map(|(offset, value)| {
            let display = conversion.to_display(value?);
            if !display.is_finite() {
                return None;
            }
            let lead = offset.as_lead_hours(init_time)?;
            Some((lead, round2(display)))
        })
        .unzip();
    SeriesView {
        lead_times_hours,
        values,
        unit: unit.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub variable: String,
    pub threshold: f64,
    pub threshold_display: f64,
    pub operator: String,
    pub unit: String,
}

impl From<&EventDefinition> for EventView {
    fn from(event: &EventDefinition) -> Self {
        Self {
            id: event.event_id.clone(),
            name: event.name.clone(),
            description: event.description.clone(),
            variable: event.variable.clone(),
            threshold: event.threshold,
            threshold_display: event.threshold_display(),
            operator: event.operator.to_string(),
            unit: event.unit.clone(),
        }
    }
}

/// The single response type of `/query`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    /// Grid point actually used, not the requested coordinate.
    pub location: GeoPoint,
    pub event: EventView,
    pub timing: TimingView,
    pub forecast_init_time: Option<String>,
    pub query_time: String,
    pub data_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_series: Option<SeriesView>,
}

/// Which optional response fields a query mode can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatProfile {
    /// Computed from the live series; carries `timeSeries`.
    OnDemand,
    /// Read back from batch output; the series is not stored.
    Precomputed,
}

impl FormatProfile {
    pub fn includes_series(&self) -> bool {
        matches!(self, FormatProfile::OnDemand)
    }
}

/// Everything a response is assembled from.
#[derive(Debug, Clone)]
pub struct ResponseParts<'a> {
    pub event: &'a EventDefinition,
    pub location: GeoPoint,
    pub timing: TimingView,
    pub init_time: Option<DateTime<Utc>>,
    pub query_time: DateTime<Utc>,
    pub data_source: &'a str,
    pub series: Option<&'a SampleSeries>,
}

pub fn render(profile: FormatProfile, parts: ResponseParts<'_>) -> QueryResponse {
    let time_series = if profile.includes_series() {
        parts
            .series
            .map(|s| format_series(s, &parts.event.variable, &parts.event.unit, parts.init_time))
    } else {
        None
    };
    let data_source = if parts.data_source.trim().is_empty() {
        DEFAULT_DATA_SOURCE
    } else {
        parts.data_source
    };
    QueryResponse {
        location: parts.location,
        event: EventView::from(parts.event),
        timing: parts.timing,
        forecast_init_time: parts.init_time.map(format_timestamp),
        query_time: format_timestamp(parts.query_time),
        data_source: data_source.to_string(),
        time_series,
    }
}
