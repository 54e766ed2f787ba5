/// Batch mode: event timing for every grid cell.
///
/// Opens the source once, then for each event in the catalog extracts every
/// cell's series from the latest run and runs it through the same
/// evaluator/engine/formatter path as an on-demand query. Cells run on a
/// rayon pool sized by `workers`; the result does not depend on the worker
/// count.
///
/// Failure policy:
/// - source unavailable or malformed → the run aborts before anything is
///   written;
/// - one event fails → it is logged, listed in `events_failed`, and the
///   other events are still written;
/// - no event succeeds → the run fails.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;

use crate::analysis;
use crate::events::{EventCatalog, EventDefinition};
use crate::format::{self, TimingView};
use crate::ingest::extract::VariableView;
use crate::ingest::{ForecastDataset, ForecastSource, SourceError};
use crate::logging::{self, Component};
use crate::model::{EngineError, EventTiming};
use crate::persist::BatchOutput;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("forecast source unavailable, nothing written: {0}")]
    Source(#[from] SourceError),
    #[error("event catalog is empty")]
    EmptyCatalog,
    #[error("no event succeeded (failed: {})", .0.join(", "))]
    NoEventSucceeded(Vec<String>),
}

/// Why a single event could not be computed.
#[derive(Debug, Error)]
pub enum EventError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to start batch worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Timing of one event over the whole grid, cells in `[lat][lon]` order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGrid {
    pub event_id: String,
    pub init_time: Option<DateTime<Utc>>,
    pub timings: Vec<EventTiming>,
}

impl EventGrid {
    pub fn views(&self) -> Vec<TimingView> {
        self.timings
            .iter()
            .map(|t| format::format_timing(t, self.init_time))
            .collect()
    }
}

/// Size of rayon's global pool, one thread per logical CPU unless
/// `RAYON_NUM_THREADS` says otherwise.
pub fn default_workers() -> usize {
    rayon::current_num_threads()
}

/// Computes `event` at every cell of `dataset` on a pool of `workers` threads.
pub fn compute_event_grid(
    dataset: &ForecastDataset,
    event: &EventDefinition,
    workers: usize,
) -> Result<EventGrid, EventError> {
    let view = VariableView::resolve(dataset, &event.variable)?;
    let condition = event.condition();
    let nlon = dataset.longitude.len();
    let cells = dataset.cell_count();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()?;
    let timings = pool.install(|| {
        (0..cells)
            .into_par_iter()
            .map(|cell| {
                let series = view.cell_series(cell / nlon, cell % nlon);
                analysis::series_timing(&series, &condition)
            })
            .collect::<Result<Vec<_>, _>>()
    })?;

    Ok(EventGrid {
        event_id: event.event_id.clone(),
        init_time: view.init_time(),
        timings,
    })
}

/// Runs every catalog event against a freshly opened snapshot of `source`.
pub fn run_batch(
    source: &dyn ForecastSource,
    catalog: &EventCatalog,
    workers: usize,
    processing_time: DateTime<Utc>,
) -> Result<BatchOutput, BatchError> {
    if catalog.is_empty() {
        return Err(BatchError::EmptyCatalog);
    }

    tracing::info!(component = %Component::Batch, source = %source.name(), "opening forecast source");
    let dataset = source.open()?;
    run_batch_on(&dataset, &source.name(), catalog, workers, processing_time)
}

/// Like `run_batch`, over an already opened dataset.
pub fn run_batch_on(
    dataset: &ForecastDataset,
    source_name: &str,
    catalog: &EventCatalog,
    workers: usize,
    processing_time: DateTime<Utc>,
) -> Result<BatchOutput, BatchError> {
    let mut output = BatchOutput::new(
        &dataset.title,
        dataset.source_label(source_name),
        dataset.latest_init_time(),
        processing_time,
        dataset.latitude.clone(),
        dataset.longitude.clone(),
    );

    for event in catalog.events() {
        tracing::info!(
            component = %Component::Batch,
            event_id = %event.event_id,
            cells = dataset.cell_count(),
            workers,
            "processing event"
        );
        match compute_event_grid(dataset, event, workers) {
            Ok(grid) => {
                let breaching = grid.timings.iter().filter(|t| t.has_breach()).count();
                tracing::info!(
                    component = %Component::Batch,
                    event_id = %event.event_id,
                    breaching_cells = breaching,
                    "event processed"
                );
                output.insert_event(&event.event_id, &grid.views());
            }
            Err(e) => {
                tracing::error!(
                    component = %Component::Batch,
                    event_id = %event.event_id,
                    "event failed, skipping: {}",
                    e
                );
                output.mark_failed(&event.event_id);
            }
        }
    }

    logging::log_batch_summary(
        catalog.len(),
        output.events_processed.len(),
        &output.events_failed,
    );
    if output.events_processed.is_empty() {
        return Err(BatchError::NoEventSucceeded(output.events_failed));
    }
    Ok(output)
}
