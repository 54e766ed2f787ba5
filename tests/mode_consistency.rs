/// Batch and on-demand modes must agree.
///
/// Tests verify, on the synthetic dev-mode grid:
/// 1. On-demand timing equals the persisted batch timing at the same cell
/// 2. The answer survives the JSON round trip through the precomputed mode
/// 3. Batch results do not depend on the worker count
///
/// Run with: cargo test --test mode_consistency

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use whenwx_service::batch;
use whenwx_service::dev_mode::{DevMode, MockSource};
use whenwx_service::events::{self, EventCatalog};
use whenwx_service::ingest::cache::DatasetCache;
use whenwx_service::ingest::ForecastDataset;
use whenwx_service::model::GeoPoint;
use whenwx_service::persist;
use whenwx_service::query::{self, QueryService};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn init_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 28, 0, 0, 0).unwrap()
}

fn query_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 28, 7, 15, 0).unwrap()
}

fn dev() -> DevMode {
    DevMode {
        resolution_deg: 15.0,
        steps: 17,
        ..DevMode::new(init_time())
    }
}

fn catalog() -> EventCatalog {
    // A mild threshold breaches in many cells, so agreement is checked on
    // non-null values too.
    let mut mild = events::freezing_below(5.0);
    mild.event_id = "frost".to_string();
    EventCatalog::with_extra(vec![mild]).unwrap()
}

fn sample_points(dataset: &ForecastDataset) -> Vec<GeoPoint> {
    let mut points = Vec::new();
    for lat in dataset.latitude.iter().step_by(2) {
        for lon in dataset.longitude.iter().step_by(3) {
            // Offset from the cell centre so snapping is exercised.
            points.push(GeoPoint::new(
                (lat + 3.0).clamp(-90.0, 90.0),
                (lon - 4.0).clamp(-180.0, 180.0),
            ));
        }
    }
    points
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_on_demand_matches_batch_at_every_sampled_point() {
    let dataset = dev().build_dataset();
    let catalog = catalog();
    let output = batch::run_batch_on(&dataset, "mock", &catalog, 4, query_time()).unwrap();
    assert_eq!(output.events_processed, vec!["freezing", "heat", "frost"]);
    assert!(output.events_failed.is_empty());

    let mut breaching = 0;
    for point in sample_points(&dataset) {
        for event in catalog.events() {
            let live = query::answer_on_demand(&dataset, "mock", event, point, query_time()).unwrap();
            let stored = query::answer_precomputed(&output, event, point, query_time()).unwrap();
            assert_eq!(live.location, stored.location, "snapped cell differs at {:?}", point);
            assert_eq!(
                live.timing, stored.timing,
                "timing differs for {} at {:?}",
                event.event_id, point
            );
            if live.timing.first_breach_time.is_some() {
                breaching += 1;
            }
        }
    }
    assert!(breaching > 0, "the synthetic grid should breach somewhere");
}

#[test]
fn test_precomputed_service_matches_on_demand_service() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("event_timing.json");

    let dataset = dev().build_dataset();
    let output = batch::run_batch_on(&dataset, "mock", &catalog(), 2, query_time()).unwrap();
    persist::json::write_output(&path, &output).unwrap();

    let cache = DatasetCache::with_default_ttl(Arc::new(MockSource::new(dev())));
    let live = QueryService::on_demand(Arc::new(catalog()), Arc::new(cache));
    let stored = QueryService::precomputed(Arc::new(catalog()), &path);

    for (lat, lon) in [(75.0, 20.0), (-80.0, -170.0), (0.0, 0.0), (44.9, 179.9)] {
        for event_id in ["freezing", "heat", "frost"] {
            let a = live.query(lat, lon, event_id, query_time()).unwrap();
            let b = stored.query(lat, lon, event_id, query_time()).unwrap();
            assert_eq!(a.timing, b.timing, "{} at ({}, {})", event_id, lat, lon);
            assert_eq!(a.forecast_init_time, b.forecast_init_time);
            assert_eq!(a.event, b.event);
            assert!(a.time_series.is_some());
            assert!(b.time_series.is_none());
        }
    }
}

#[test]
fn test_batch_is_independent_of_worker_count() {
    let dataset = dev().build_dataset();
    let event = events::freezing_below(-10.0);
    let sequential = batch::compute_event_grid(&dataset, &event, 1).unwrap();
    for workers in [2, 7, 32] {
        let parallel = batch::compute_event_grid(&dataset, &event, workers).unwrap();
        assert_eq!(parallel, sequential, "{} workers", workers);
    }
}

#[test]
fn test_polar_cell_freezes_from_the_first_step() {
    let dataset = dev().build_dataset();
    let event = events::freezing_below(-10.0);
    let response =
        query::answer_on_demand(&dataset, "mock", &event, GeoPoint::new(-90.0, 0.0), query_time())
            .unwrap();
    assert_eq!(
        response.timing.first_breach_time.as_deref(),
        Some("2025-01-28T00:00:00Z")
    );
    // Cold all the way through: one episode measured to the last sample.
    assert_eq!(response.timing.duration_hours, Some(48.0));
    assert_eq!(response.timing.next_breach_time, None);
}
