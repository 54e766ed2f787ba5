/// HTTP query surface.
///
/// Routes:
/// - `GET /query?lat=..&lon=..&event_id=..`: event timing at one location
/// - `GET /events`: the event catalog
/// - `GET /health`: liveness and query mode
/// - `GET /`: service description
///
/// Queries do blocking I/O (opening the grid) and CPU work, so each one runs
/// on the blocking pool under the configured deadline. A query that misses
/// the deadline answers 504; its result is discarded when it finishes and
/// nothing else observes it.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::format::{self, EventView, QueryResponse};
use crate::logging::{self, Component};
use crate::query::{QueryError, QueryService};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QueryService>,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(service: QueryService, request_timeout: Duration) -> Self {
        Self {
            service: Arc::new(service),
            request_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// JSON error body: `{"error": <kind>, "detail": <reason>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &str, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: kind.to_string(),
                detail: detail.into(),
            },
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, err.kind(), err.to_string())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub lat: f64,
    pub lon: f64,
    pub event_id: String,
}

async fn query_timing(
    State(state): State<AppState>,
    params: Result<Query<QueryParams>, QueryRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Query(params) = params?;
    let service = Arc::clone(&state.service);
    let now = Utc::now();
    let (lat, lon) = (params.lat, params.lon);
    let event_id = params.event_id.clone();

    let task = tokio::task::spawn_blocking(move || {
        service.query(params.lat, params.lon, &params.event_id, now)
    });

    match tokio::time::timeout(state.request_timeout, task).await {
        Ok(Ok(result)) => Ok(Json(result?)),
        Ok(Err(join_error)) => {
            let err = QueryError::Internal(join_error.to_string());
            logging::log_query_failure(&event_id, lat, lon, &err);
            Err(err.into())
        }
        Err(_elapsed) => {
            let err = QueryError::Timeout {
                seconds: state.request_timeout.as_secs(),
            };
            logging::log_query_failure(&event_id, lat, lon, &err);
            Err(err.into())
        }
    }
}

async fn list_events(State(state): State<AppState>) -> Json<serde_json::Value> {
    let events: Vec<EventView> = state
        .service
        .catalog()
        .events()
        .iter()
        .map(EventView::from)
        .collect();
    Json(json!({ "events": events }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": format::format_timestamp(Utc::now()),
        "mode": state.service.mode(),
    }))
}

async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "whenwx",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.service.mode(),
        "endpoints": ["/query", "/events", "/health"],
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/query", get(query_timing))
        .route("/events", get(list_events))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(component = %Component::Server, "failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!(component = %Component::Server, "shutdown signal received");
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(state: AppState, addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        component = %Component::Server,
        addr,
        mode = state.service.mode(),
        timeout_secs = state.request_timeout.as_secs(),
        "query server listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}
