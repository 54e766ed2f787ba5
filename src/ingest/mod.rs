/// Forecast grid ingestion.
///
/// The upstream chunked-array store is modelled as a `ForecastSource` that
/// can open a `ForecastDataset` snapshot. Everything downstream (series
/// extraction, the on-demand cache, the batch run) only sees that trait.
///
/// Submodules:
/// - `grid`: the dataset snapshot and nearest-point snapping.
/// - `extract`: one sample series per grid cell or queried point.
/// - `cache`: time-to-live cache of the opened dataset.
/// - `http`: source backed by a remote JSON grid document.

pub mod cache;
pub mod extract;
pub mod grid;
pub mod http;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use grid::ForecastDataset;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while opening a source or extracting a series from it.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read forecast grid {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP error: {status} from {url}")]
    HttpStatus { status: u16, url: String },
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("malformed forecast grid: {0}")]
    Malformed(String),
    #[error("forecast grid has no model runs")]
    NoRuns,
    #[error("Variable '{0}' not found in dataset")]
    VariableNotFound(String),
    #[error("failed to select nearest grid point to ({latitude}, {longitude})")]
    NearestPoint { latitude: f64, longitude: f64 },
}

impl SourceError {
    /// `true` when the source itself could not be reached, as opposed to
    /// returning data that violates the grid contract.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            SourceError::Io { .. } | SourceError::Http(_) | SourceError::HttpStatus { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// An upstream provider of forecast grids.
pub trait ForecastSource: Send + Sync {
    /// Human-readable identifier for logs.
    fn name(&self) -> String;

    /// Opens a fresh snapshot of the grid.
    fn open(&self) -> Result<ForecastDataset, SourceError>;

    /// Initialization time of the newest model run available upstream.
    fn latest_init_time(&self) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(self.open()?.latest_init_time())
    }
}

/// JSON grid document on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    pub path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ForecastSource for FileSource {
    fn name(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn open(&self) -> Result<ForecastDataset, SourceError> {
        let body = std::fs::read_to_string(&self.path).map_err(|source| SourceError::Io {
            path: self.path.clone(),
            source,
        })?;
        ForecastDataset::from_json(&body)
    }
}

/// A dataset already held in memory.
#[derive(Debug, Clone)]
pub struct StaticSource {
    dataset: Arc<ForecastDataset>,
}

impl StaticSource {
    pub fn new(dataset: ForecastDataset) -> Self {
        Self { dataset: Arc::new(dataset) }
    }
}

impl ForecastSource for StaticSource {
    fn name(&self) -> String {
        "static".to_string()
    }

    fn open(&self) -> Result<ForecastDataset, SourceError> {
        self.dataset.validate()?;
        Ok((*self.dataset).clone())
    }
}

/// Builds a source from a configuration string: `mock`, an `http(s)://` URL,
/// or a filesystem path.
pub fn source_from_uri(
    uri: &str,
    http_timeout: Duration,
) -> Result<Arc<dyn ForecastSource>, SourceError> {
    let uri = uri.trim();
    if uri.eq_ignore_ascii_case("mock") {
        return Ok(Arc::new(crate::dev_mode::MockSource::default()));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Arc::new(http::HttpSource::new(uri, http_timeout)?));
    }
    Ok(Arc::new(FileSource::new(uri)))
}
