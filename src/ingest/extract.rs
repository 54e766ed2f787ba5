//! Series extraction.
//!
//! Pulls one ordered `SampleSeries` out of a `ForecastDataset`, always from
//! the latest model run. The batch run extracts every grid cell through
//! `VariableView::cell_series`; the on-demand path snaps a queried point to
//! its nearest cell and extracts that same cell, so both modes feed the
//! engine identical input.

use chrono::{DateTime, Utc};

use super::grid::{ForecastDataset, ForecastRun, nearest_index, nearest_longitude_index};
use super::SourceError;
use crate::model::{GeoPoint, Offset, SampleSeries};
use crate::variables;

/// A series extracted for a queried point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSeries {
    pub series: SampleSeries,
    pub init_time: Option<DateTime<Utc>>,
    /// Grid coordinates actually used, which may differ from the request.
    pub snapped: GeoPoint,
    pub lat_idx: usize,
    pub lon_idx: usize,
}

/// A variable of the latest run, resolved once and read per cell.
///
/// For derived variables `components` holds every source array and each
/// sample is their Euclidean magnitude.
#[derive(Debug)]
pub struct VariableView<'a> {
    dataset: &'a ForecastDataset,
    run: &'a ForecastRun,
    components: Vec<&'a [Option<f64>]>,
    offsets: Vec<Offset>,
}

impl<'a> VariableView<'a> {
    /// Resolves `variable` in the latest run, by exact name first, then by
    /// the registry's source variables and aliases.
    pub fn resolve(dataset: &'a ForecastDataset, variable: &str) -> Result<Self, SourceError> {
        let run = dataset.latest_run().ok_or(SourceError::NoRuns)?;
        let components = resolve_components(run, variable)
            .ok_or_else(|| SourceError::VariableNotFound(variable.to_string()))?;
        Ok(Self {
            dataset,
            run,
            components,
            offsets: run.time.offsets(),
        })
    }

    pub fn init_time(&self) -> Option<DateTime<Utc>> {
        self.run.init_time
    }

    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    /// The series at grid cell `(lat_idx, lon_idx)`.
    pub fn cell_series(&self, lat_idx: usize, lon_idx: usize) -> SampleSeries {
        let nlon = self.dataset.longitude.len();
        let cells = self.dataset.cell_count();
        let cell = lat_idx * nlon + lon_idx;
        let values = (0..self.offsets.len())
            .map(|t| {
                let at = t * cells + cell;
                if self.components.len() == 1 {
                    self.components[0][at]
                } else {
                    magnitude(self.components.iter().map(|c| c[at]))
                }
            })
            .collect();
        SampleSeries::new(self.offsets.clone(), values)
    }
}

fn resolve_components<'a>(run: &'a ForecastRun, variable: &str) -> Option<Vec<&'a [Option<f64>]>> {
    if let Some(values) = run.variables.get(variable) {
        return Some(vec![values.as_slice()]);
    }
    let registered = variables::find_variable(variable)?;
    if registered.is_derived() {
        return registered
            .source_variables
            .iter()
            .map(|name| run.variables.get(*name).map(Vec::as_slice))
            .collect();
    }
    std::iter::once(&registered.id)
        .chain(registered.source_variables.iter())
        .chain(registered.aliases.iter())
        .find_map(|name| run.variables.get(*name))
        .map(|values| vec![values.as_slice()])
}

/// Euclidean magnitude of vector components; missing if any component is.
fn magnitude(components: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut sum = 0.0;
    for c in components {
        let c = c.filter(|v| v.is_finite())?;
        sum += c * c;
    }
    Some(sum.sqrt())
}

/// Extracts the series of `variable` at grid cell `(lat_idx, lon_idx)`.
pub fn extract_cell(
    dataset: &ForecastDataset,
    variable: &str,
    lat_idx: usize,
    lon_idx: usize,
) -> Result<SampleSeries, SourceError> {
    if lat_idx >= dataset.latitude.len() || lon_idx >= dataset.longitude.len() {
        return Err(SourceError::Malformed(format!(
            "cell ({}, {}) outside {}x{} grid",
            lat_idx,
            lon_idx,
            dataset.latitude.len(),
            dataset.longitude.len()
        )));
    }
    Ok(VariableView::resolve(dataset, variable)?.cell_series(lat_idx, lon_idx))
}

/// Snaps `point` to the nearest grid cell and extracts its series.
pub fn extract_point(
    dataset: &ForecastDataset,
    variable: &str,
    point: GeoPoint,
) -> Result<PointSeries, SourceError> {
    let (lat_idx, lon_idx) = snap(dataset, point)?;
    let view = VariableView::resolve(dataset, variable)?;
    Ok(PointSeries {
        series: view.cell_series(lat_idx, lon_idx),
        init_time: view.init_time(),
        snapped: GeoPoint::new(dataset.latitude[lat_idx], dataset.longitude[lon_idx]),
        lat_idx,
        lon_idx,
    })
}

/// Nearest `(lat_idx, lon_idx)` to `point`.
pub fn snap(dataset: &ForecastDataset, point: GeoPoint) -> Result<(usize, usize), SourceError> {
    let failed = || SourceError::NearestPoint {
        latitude: point.latitude,
        longitude: point.longitude,
    };
    if !point.latitude.is_finite() || !point.longitude.is_finite() {
        return Err(failed());
    }
    let lat_idx = nearest_index(&dataset.latitude, point.latitude).ok_or_else(failed)?;
    let lon_idx = nearest_longitude_index(&dataset.longitude, point.longitude).ok_or_else(failed)?;
    Ok((lat_idx, lon_idx))
}
