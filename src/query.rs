/// Query orchestration: one location, one event.
///
/// Two backends answer `/query`:
/// - on-demand: snap to the nearest cell of the cached live grid, extract its
///   series, evaluate and time it, and include the series for charting;
/// - precomputed: snap to the nearest cell of the persisted batch output and
///   read the stored timing back.
///
/// Both produce the same `QueryResponse` and, for the same cell and model
/// run, the same timing values.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::analysis;
use crate::events::{EventCatalog, EventDefinition};
use crate::format::{self, FormatProfile, QueryResponse, ResponseParts};
use crate::ingest::cache::DatasetCache;
use crate::ingest::extract::{self, PointSeries};
use crate::ingest::{ForecastDataset, SourceError};
use crate::logging::{self, Component};
use crate::model::{EngineError, EventTiming, GeoPoint};
use crate::persist::{self, BatchOutput, PersistError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Unknown event: {event_id}. Available: {available}")]
    UnknownEvent { event_id: String, available: String },
    #[error("invalid coordinate ({latitude}, {longitude}): latitude must be in [-90, 90] and longitude in [-180, 180]")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("query did not finish within {seconds}s")]
    Timeout { seconds: u64 },
    #[error("query task failed: {0}")]
    Internal(String),
}

impl QueryError {
    /// HTTP status the query surface answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::UnknownEvent { .. }
            | QueryError::InvalidCoordinate { .. }
            | QueryError::Source(SourceError::NearestPoint { .. }) => 400,
            QueryError::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Machine-readable error kind for the JSON error body.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::UnknownEvent { .. } => "unknown_event",
            QueryError::InvalidCoordinate { .. } => "invalid_coordinate",
            QueryError::Source(SourceError::NearestPoint { .. }) => "nearest_point_failed",
            QueryError::Source(SourceError::VariableNotFound(_)) => "variable_not_found",
            QueryError::Source(e) if e.is_unavailable() => "upstream_unavailable",
            QueryError::Persist(e) if e.is_unavailable() => "upstream_unavailable",
            QueryError::Timeout { .. } => "timeout",
            QueryError::Internal(_) => "internal",
            _ => "data_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

/// Resolves the event and validates the coordinate. Nothing is read from any
/// data source before both checks pass.
pub fn resolve_request<'a>(
    catalog: &'a EventCatalog,
    latitude: f64,
    longitude: f64,
    event_id: &str,
) -> Result<(&'a EventDefinition, GeoPoint), QueryError> {
    let event = catalog.find(event_id).ok_or_else(|| QueryError::UnknownEvent {
        event_id: event_id.to_string(),
        available: catalog.ids().join(", "),
    })?;
    let point = GeoPoint::new(latitude, longitude);
    if !point.is_valid() {
        return Err(QueryError::InvalidCoordinate { latitude, longitude });
    }
    Ok((event, point))
}

// ---------------------------------------------------------------------------
// On-demand
// ---------------------------------------------------------------------------

/// Series and timing of one event at the grid cell nearest to a point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointTiming {
    pub point: PointSeries,
    pub timing: EventTiming,
}

pub fn compute_point(
    dataset: &ForecastDataset,
    event: &EventDefinition,
    point: GeoPoint,
) -> Result<PointTiming, QueryError> {
    let extracted = extract::extract_point(dataset, &event.variable, point)?;
    let timing = analysis::series_timing(&extracted.series, &event.condition())?;
    Ok(PointTiming {
        point: extracted,
        timing,
    })
}

pub fn answer_on_demand(
    dataset: &ForecastDataset,
    source_name: &str,
    event: &EventDefinition,
    point: GeoPoint,
    now: DateTime<Utc>,
) -> Result<QueryResponse, QueryError> {
    let computed = compute_point(dataset, event, point)?;
    let init_time = computed.point.init_time;
    Ok(format::render(
        FormatProfile::OnDemand,
        ResponseParts {
            event,
            location: computed.point.snapped,
            timing: format::format_timing(&computed.timing, init_time),
            init_time,
            query_time: now,
            data_source: dataset.source_label(source_name),
            series: Some(&computed.point.series),
        },
    ))
}

// ---------------------------------------------------------------------------
// Precomputed
// ---------------------------------------------------------------------------

pub fn answer_precomputed(
    output: &BatchOutput,
    event: &EventDefinition,
    point: GeoPoint,
    now: DateTime<Utc>,
) -> Result<QueryResponse, QueryError> {
    let (lat_idx, lon_idx) = output.snap(point).ok_or(SourceError::NearestPoint {
        latitude: point.latitude,
        longitude: point.longitude,
    })?;
    let timing = output.timing_at(&event.event_id, lat_idx, lon_idx)?;
    Ok(format::render(
        FormatProfile::Precomputed,
        ResponseParts {
            event,
            location: output.cell_point(lat_idx, lon_idx),
            timing,
            init_time: output.forecast_init_time,
            query_time: now,
            data_source: &output.data_source,
            series: None,
        },
    ))
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Where query answers come from.
pub enum QueryBackend {
    OnDemand(Arc<DatasetCache>),
    /// Path of the JSON batch output.
    Precomputed(PathBuf),
}

/// Event catalog plus backend, shared by all request handlers.
pub struct QueryService {
    catalog: Arc<EventCatalog>,
    backend: QueryBackend,
}

impl QueryService {
    pub fn new(catalog: Arc<EventCatalog>, backend: QueryBackend) -> Self {
        Self { catalog, backend }
    }

    pub fn on_demand(catalog: Arc<EventCatalog>, cache: Arc<DatasetCache>) -> Self {
        Self::new(catalog, QueryBackend::OnDemand(cache))
    }

    pub fn precomputed(catalog: Arc<EventCatalog>, path: impl Into<PathBuf>) -> Self {
        Self::new(catalog, QueryBackend::Precomputed(path.into()))
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    pub fn mode(&self) -> &'static str {
        match self.backend {
            QueryBackend::OnDemand(_) => "on-demand",
            QueryBackend::Precomputed(_) => "pre-computed",
        }
    }

    /// Answers one query at time `now`. Failures are logged before they are
    /// returned.
    pub fn query(
        &self,
        latitude: f64,
        longitude: f64,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<QueryResponse, QueryError> {
        let result = self.answer(latitude, longitude, event_id, now);
        match &result {
            Ok(response) => tracing::debug!(
                component = %Component::Query,
                event_id,
                latitude,
                longitude,
                snapped_latitude = response.location.latitude,
                snapped_longitude = response.location.longitude,
                first_breach = ?response.timing.first_breach_time,
                "query answered"
            ),
            Err(e) => logging::log_query_failure(event_id, latitude, longitude, e),
        }
        result
    }

    fn answer(
        &self,
        latitude: f64,
        longitude: f64,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<QueryResponse, QueryError> {
        let (event, point) = resolve_request(&self.catalog, latitude, longitude, event_id)?;
        match &self.backend {
            QueryBackend::OnDemand(cache) => {
                let dataset = cache.get_or_refresh(now)?;
                answer_on_demand(&dataset, &cache.source_name(), event, point, now)
            }
            QueryBackend::Precomputed(path) => {
                let output = persist::json::read_output(path)?;
                answer_precomputed(&output, event, point, now)
            }
        }
    }
}
