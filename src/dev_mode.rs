/// Development mode utilities for working without the upstream store
///
/// When the forecast store is unreachable (or during local development), use
/// this module to generate a synthetic global grid with the same shape and
/// variables as the real one. The grid is deterministic for a given
/// initialization time and seed, so repeated runs produce the same events.
///
/// Temperatures fall off toward the poles and swing with a travelling
/// synoptic wave, so high latitudes regularly breach the freezing event and
/// parts of the tropics breach the heat event.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use chrono::{DateTime, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ingest::grid::{ForecastDataset, ForecastRun, TimeAxis};
use crate::ingest::{ForecastSource, SourceError};

pub const MOCK_TITLE: &str = "Synthetic forecast grid (dev mode)";

/// Configuration for the synthetic grid
#[derive(Debug, Clone, PartialEq)]
pub struct DevMode {
    /// Grid spacing in degrees (default: 2.0)
    pub resolution_deg: f64,
    /// Number of time steps including lead 0 (default: 41 = 5 days)
    pub steps: usize,
    /// Hours between steps (default: 3)
    pub step_hours: f64,
    pub init_time: DateTime<Utc>,
    pub seed: u64,
}

impl DevMode {
    /// Create a new dev mode configuration
    ///
    /// # Arguments
    /// * `init_time` - Model initialization time stamped on the synthetic run
    pub fn new(init_time: DateTime<Utc>) -> Self {
        Self {
            resolution_deg: 2.0,
            steps: 41,
            step_hours: 3.0,
            init_time,
            seed: 42,
        }
    }

    /// Dev mode anchored to the most recent 00Z/12Z cycle before `now`.
    pub fn for_cycle(now: DateTime<Utc>) -> Self {
        Self::new(latest_cycle(now))
    }

    pub fn latitudes(&self) -> Vec<f64> {
        axis(-90.0, 90.0, self.resolution_deg, true)
    }

    pub fn longitudes(&self) -> Vec<f64> {
        axis(-180.0, 180.0, self.resolution_deg, false)
    }

    /// Builds the synthetic dataset: `2t` (K), `10u` and `10v` (m/s).
    pub fn build_dataset(&self) -> ForecastDataset {
        let latitudes = self.latitudes();
        let longitudes = self.longitudes();
        let lead_hours: Vec<f64> = (0..self.steps).map(|i| i as f64 * self.step_hours).collect();
        let mut rng = StdRng::seed_from_u64(self.seed);

        let size = lead_hours.len() * latitudes.len() * longitudes.len();
        let mut temperature = Vec::with_capacity(size);
        let mut u_wind = Vec::with_capacity(size);
        let mut v_wind = Vec::with_capacity(size);

        for hours in &lead_hours {
            let phase = 2.0 * PI * hours / 72.0;
            let diurnal_phase = 2.0 * PI * hours / 24.0;
            for lat in &latitudes {
                let lat_rad = lat.to_radians();
                let base = 300.0 - 0.6 * lat.abs();
                for lon in &longitudes {
                    let lon_rad = lon.to_radians();
                    let synoptic = 8.0 * (phase + lon_rad).sin();
                    let diurnal = 5.0 * (diurnal_phase + lon_rad).sin() * lat_rad.cos();
                    let noise: f64 = rng.gen_range(-1.0..1.0);
                    temperature.push(Some(base + synoptic + diurnal + noise));

                    let u = 5.0 + 10.0 * (2.0 * lat_rad).sin() + rng.gen_range(-2.0..2.0);
                    let v = 3.0 * (phase - lon_rad).cos() + rng.gen_range(-2.0..2.0);
                    u_wind.push(Some(u));
                    v_wind.push(Some(v));
                }
            }
        }

        let mut variables = BTreeMap::new();
        variables.insert("2t".to_string(), temperature);
        variables.insert("10u".to_string(), u_wind);
        variables.insert("10v".to_string(), v_wind);

        ForecastDataset {
            title: MOCK_TITLE.to_string(),
            source: "dev_mode".to_string(),
            latitude: latitudes,
            longitude: longitudes,
            runs: vec![ForecastRun {
                init_time: Some(self.init_time),
                time: TimeAxis::LeadHours(lead_hours),
                variables,
            }],
        }
    }
}

fn axis(start: f64, end: f64, step: f64, inclusive: bool) -> Vec<f64> {
    let count = ((end - start) / step).floor() as usize;
    let count = if inclusive { count + 1 } else { count };
    (0..count).map(|i| start + i as f64 * step).collect()
}

/// Most recent 00Z or 12Z cycle at or before `now`.
pub fn latest_cycle(now: DateTime<Utc>) -> DateTime<Utc> {
    let hour = if now.hour() >= 12 { 12 } else { 0 };
    now.date_naive()
        .and_hms_opt(hour, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or(now)
}

/// `ForecastSource` serving the synthetic grid.
#[derive(Debug, Clone)]
pub struct MockSource {
    dev: DevMode,
}

impl MockSource {
    pub fn new(dev: DevMode) -> Self {
        Self { dev }
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new(DevMode::for_cycle(Utc::now()))
    }
}

impl ForecastSource for MockSource {
    fn name(&self) -> String {
        "mock".to_string()
    }

    fn open(&self) -> Result<ForecastDataset, SourceError> {
        Ok(self.dev.build_dataset())
    }

    fn latest_init_time(&self) -> Result<Option<DateTime<Utc>>, SourceError> {
        Ok(Some(self.dev.init_time))
    }
}
