//! HTTP control surface, health checks and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use sync_core::{
    health::{ComponentStatus, HealthRegistry},
    ScheduleStatus, SyncError, SyncFilters, SyncOrchestrator, SyncScheduler, SyncStatus,
};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub scheduler: Arc<SyncScheduler>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SyncOrchestrator>,
        scheduler: Arc<SyncScheduler>,
        health_registry: HealthRegistry,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            health_registry,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SyncRequest {
    pub full_sync: bool,
    pub filters: SyncFilters,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScheduleRequest {
    pub interval_minutes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CleanupRequest {
    pub days_to_keep: Option<u32>,
}

/// Sync status plus the scheduler's state
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub schedule: ScheduleStatus,
}

/// `SyncError` rendered as a JSON error body
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            SyncError::AlreadyRunning { .. } | SyncError::CleanupInProgress => StatusCode::CONFLICT,
            SyncError::InvalidRetention(_) | SyncError::Config(_) => StatusCode::BAD_REQUEST,
            SyncError::Classified { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let mut body = json!({ "error": self.0.to_string() });
        match &self.0 {
            SyncError::AlreadyRunning { run_id } => body["run_id"] = json!(run_id),
            SyncError::Classified { classification } => {
                body["classification"] = json!(classification)
            }
            _ => {}
        }
        (code, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Run a sync to completion and return the finished run
async fn trigger_sync(
    State(state): State<Arc<AppState>>,
    body: Option<Json<SyncRequest>>,
) -> Result<Response, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    info!(
        full_sync = request.full_sync,
        filtered = !request.filters.is_empty(),
        "Sync requested"
    );

    // The run owns its own task so a dropped connection does not cancel it
    let orchestrator = Arc::clone(&state.orchestrator);
    let handle = tokio::spawn(async move {
        orchestrator
            .trigger(request.full_sync, request.filters)
            .await
    });
    let run = match handle.await {
        Ok(result) => result?,
        Err(join_err) => {
            error!(error = %join_err, "Sync task ended abnormally");
            return Err(SyncError::Other(anyhow::anyhow!("sync task failed: {}", join_err)).into());
        }
    };
    Ok((StatusCode::OK, Json(run)).into_response())
}

async fn sync_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: state.orchestrator.sync_status().await,
        schedule: state.scheduler.status(),
    })
}

async fn sync_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.detailed_stats().await)
}

async fn start_schedule(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ScheduleRequest>>,
) -> ApiResult<ScheduleStatus> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let status = state
        .scheduler
        .start_scheduled_sync(request.interval_minutes)?;
    Ok(Json(status))
}

async fn stop_schedule(State(state): State<Arc<AppState>>) -> Json<ScheduleStatus> {
    Json(state.scheduler.stop_scheduled_sync())
}

async fn cleanup(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CleanupRequest>>,
) -> Result<Response, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let days = request
        .days_to_keep
        .unwrap_or(state.orchestrator.config().days_to_keep);
    let report = state.orchestrator.cleanup_old_records(days).await?;
    Ok(Json(report).into_response())
}

async fn connections(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.orchestrator.test_connections().await;
    let status_code = if report.all_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(report))
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health();

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Idle | ComponentStatus::Degraded => {
            StatusCode::OK
        }
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/sync", post(trigger_sync))
        .route("/api/v1/sync/status", get(sync_status))
        .route("/api/v1/sync/stats", get(sync_stats))
        .route("/api/v1/schedule/start", post(start_schedule))
        .route("/api/v1/schedule/stop", post(stop_schedule))
        .route("/api/v1/cleanup", post(cleanup))
        .route("/api/v1/connections", get(connections))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(addr: &str, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
