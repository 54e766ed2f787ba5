/// Integration tests for the HTTP query surface
///
/// Tests verify:
/// 1. /query answers with the canonical response shape
/// 2. Request errors map to 400 with a JSON error body
/// 3. Upstream and data errors map to 500
/// 4. A query that misses its deadline answers 504
/// 5. /events and /health
///
/// The router is driven in-process with `tower::ServiceExt::oneshot`; no
/// socket is bound.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tower::ServiceExt;
use whenwx_service::events::EventCatalog;
use whenwx_service::ingest::cache::DatasetCache;
use whenwx_service::ingest::grid::{ForecastRun, TimeAxis};
use whenwx_service::ingest::{FileSource, ForecastDataset, ForecastSource, SourceError, StaticSource};
use whenwx_service::query::QueryService;
use whenwx_service::server::{self, AppState};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn dataset() -> ForecastDataset {
    let mut variables = BTreeMap::new();
    // 1 x 2 grid, 3 steps. Cell (0, 0) is cold throughout, cell (0, 1) never.
    variables.insert(
        "2t".to_string(),
        vec![Some(250.0), Some(280.0), Some(251.0), Some(281.0), Some(252.0), Some(282.0)],
    );
    ForecastDataset {
        title: "test grid".to_string(),
        source: "unit test".to_string(),
        latitude: vec![65.0],
        longitude: vec![25.0, 26.0],
        runs: vec![ForecastRun {
            init_time: Some(Utc.with_ymd_and_hms(2025, 1, 28, 0, 0, 0).unwrap()),
            time: TimeAxis::LeadHours(vec![0.0, 6.0, 12.0]),
            variables,
        }],
    }
}

fn app_with(source: Arc<dyn ForecastSource>, timeout: Duration) -> axum::Router {
    let cache = Arc::new(DatasetCache::with_default_ttl(source));
    let service = QueryService::on_demand(Arc::new(EventCatalog::builtin()), cache);
    server::router(AppState::new(service, timeout))
}

fn app() -> axum::Router {
    app_with(Arc::new(StaticSource::new(dataset())), Duration::from_secs(10))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

/// Source that takes longer to open than any test deadline.
struct SlowSource;

impl ForecastSource for SlowSource {
    fn name(&self) -> String {
        "slow".to_string()
    }

    fn open(&self) -> Result<ForecastDataset, SourceError> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(dataset())
    }
}

// ---------------------------------------------------------------------------
// /query
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_query_returns_timing_and_series() {
    let (status, body) = get(app(), "/query?lat=65.2&lon=24.9&event_id=freezing").await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["location"]["latitude"], 65.0);
    assert_eq!(body["location"]["longitude"], 25.0);
    assert_eq!(body["event"]["id"], "freezing");
    assert_eq!(body["event"]["thresholdDisplay"], -10.0);
    assert_eq!(body["timing"]["firstBreachTime"], "2025-01-28T00:00:00Z");
    assert_eq!(body["timing"]["durationHours"], 12.0);
    assert!(body["timing"]["nextBreachTime"].is_null());
    assert_eq!(body["timing"]["modelConsistency"], 0.75);
    assert_eq!(body["forecastInitTime"], "2025-01-28T00:00:00Z");
    assert_eq!(body["dataSource"], "unit test");
    assert_eq!(body["timeSeries"]["values"][0], -23.15);
    assert_eq!(body["timeSeries"]["leadTimesHours"][2], 12.0);
}

#[tokio::test]
async fn test_query_without_breach_returns_nulls() {
    let (status, body) = get(app(), "/query?lat=65&lon=26&event_id=freezing").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["timing"]["firstBreachTime"].is_null());
    assert!(body["timing"]["durationHours"].is_null());
}

#[tokio::test]
async fn test_unknown_event_is_400_with_json_body() {
    let (status, body) = get(app(), "/query?lat=65&lon=25&event_id=tornado").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_event");
    assert!(body["detail"].as_str().unwrap().contains("tornado"));
}

#[tokio::test]
async fn test_out_of_range_coordinate_is_400() {
    let (status, body) = get(app(), "/query?lat=91&lon=25&event_id=freezing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_coordinate");
}

#[tokio::test]
async fn test_malformed_parameters_are_400() {
    let (status, body) = get(app(), "/query?lat=north&lon=25&event_id=freezing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, _) = get(app(), "/query?lat=65&lon=25").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_source_is_500() {
    let app = app_with(
        Arc::new(FileSource::new("/nonexistent/whenwx/grid.json")),
        Duration::from_secs(10),
    );
    let (status, body) = get(app, "/query?lat=65&lon=25&event_id=freezing").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "upstream_unavailable");
}

#[tokio::test]
async fn test_missing_variable_is_500() {
    let mut ds = dataset();
    let values = ds.runs[0].variables.remove("2t").unwrap();
    ds.runs[0].variables.insert("tprate".to_string(), values);
    let app = app_with(Arc::new(StaticSource::new(ds)), Duration::from_secs(10));
    let (status, body) = get(app, "/query?lat=65&lon=25&event_id=heat").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "variable_not_found");
}

#[tokio::test]
async fn test_deadline_exceeded_is_504() {
    let app = app_with(Arc::new(SlowSource), Duration::from_millis(50));
    let (status, body) = get(app, "/query?lat=65&lon=25&event_id=freezing").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "timeout");
}

// ---------------------------------------------------------------------------
// /events, /health, /
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_events_lists_catalog() {
    let (status, body) = get(app(), "/events").await;
    assert_eq!(status, StatusCode::OK);
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["id"], "freezing");
    assert_eq!(events[0]["operator"], "lt");
    assert_eq!(events[1]["id"], "heat");
    assert_eq!(events[1]["thresholdDisplay"], 35.0);
}

#[tokio::test]
async fn test_health_and_root_report_mode() {
    let (status, body) = get(app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["mode"], "on-demand");

    let (status, body) = get(app(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "whenwx");
}
