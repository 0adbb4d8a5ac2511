//! HTTP API for control, health checks and Prometheus metrics

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scaler_lib::{
    cluster::WorkloadSpec,
    history::ScalingStats,
    policy::PolicyInfo,
    scaler_loop::{AutoScaler, CycleReport, LoopStatus},
    ComponentStatus, ConfigUpdate, Decision, HealthRegistry, MutationResult, ResizeRequest,
    ResourceSample, ScalerError, WorkloadRef,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Default page size for `/decisions`
pub const DEFAULT_DECISION_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub scaler: Arc<AutoScaler>,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(scaler: Arc<AutoScaler>) -> Self {
        let health_registry = scaler.health().clone();
        Self {
            scaler,
            health_registry,
        }
    }
}

/// Error body returned by every failing handler
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                error: message.into(),
                kind: "not_found".to_string(),
            },
        }
    }
}

impl From<ScalerError> for ApiError {
    fn from(err: ScalerError) -> Self {
        let status = match &err {
            ScalerError::InvalidConfig(_) | ScalerError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ScalerError::ControllerNotFound(_) | ScalerError::WorkloadNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ScalerError::ResizeInFlight(_) => StatusCode::CONFLICT,
            e if e.is_transient() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            body: ErrorBody {
                error: err.to_string(),
                kind: err.kind().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Result of `POST /scale/all`
#[derive(Debug, Serialize, Deserialize)]
pub struct ScaleAllResponse {
    pub report: CycleReport,
    pub statistics: ScalingStats,
}

/// Everything retained for one workload
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkloadHistory {
    pub workload: WorkloadRef,
    pub samples: Vec<ResourceSample>,
    pub decisions: Vec<Decision>,
    pub mutations: Vec<MutationResult>,
}

/// Live view of one workload
#[derive(Debug, Serialize, Deserialize)]
pub struct WorkloadDetail {
    pub workload: WorkloadRef,
    /// Absent when the metrics source has no sample yet
    pub usage: Option<ResourceSample>,
    pub spec: WorkloadSpec,
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub limit: Option<usize>,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

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
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scaler.config().snapshot().await)
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ConfigUpdate>,
) -> ApiResult<scaler_lib::ScalerConfig> {
    let enable = update.enabled == Some(true);
    let updated = state.scaler.config().update(update).await?;
    if enable {
        // Revives a loop halted by /autoscale/stop
        state.scaler.start().await;
    }
    Ok(Json(updated))
}

async fn list_workloads(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<scaler_lib::cluster::WorkloadInfo>> {
    let config = state.scaler.config().snapshot().await;
    Ok(Json(state.scaler.list_workloads(&config).await?))
}

async fn scale_workload(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<scaler_lib::ScalingOutcome> {
    let workload = WorkloadRef::new(namespace, name);
    info!(workload = %workload, "On-demand evaluation requested");

    match state.scaler.evaluate_workload(&workload).await? {
        Some(outcome) => Ok(Json(outcome)),
        None => Err(ApiError::not_found(format!(
            "no usage metrics available for {}",
            workload
        ))),
    }
}

async fn workload_detail(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<WorkloadDetail> {
    let workload = WorkloadRef::new(namespace, name);
    let engine = state.scaler.engine();
    let spec = engine.workload_spec(&workload).await?;
    let usage = engine.current_usage(&workload).await?;
    Ok(Json(WorkloadDetail {
        workload,
        usage,
        spec,
    }))
}

/// Applies explicit limits; 422 with the mutation result when the resize fails
async fn resize_workload(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
    Json(request): Json<ResizeRequest>,
) -> Result<(StatusCode, Json<MutationResult>), ApiError> {
    let workload = WorkloadRef::new(namespace, name);
    let config = state.scaler.config().snapshot().await;
    let result = state
        .scaler
        .engine()
        .apply_manual(&workload, &request, &config)
        .await?;

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}

async fn model_info(State(state): State<Arc<AppState>>) -> Json<PolicyInfo> {
    Json(state.scaler.engine().policy_info())
}

async fn scale_all(State(state): State<Arc<AppState>>) -> ApiResult<ScaleAllResponse> {
    info!("On-demand cycle requested");
    let report = state.scaler.run_cycle().await?;
    let statistics = state.scaler.engine().history().stats().await;
    Ok(Json(ScaleAllResponse { report, statistics }))
}

async fn recent_decisions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DecisionsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_DECISION_LIMIT);
    Json(state.scaler.engine().history().recent_decisions(limit).await)
}

async fn workload_history(
    State(state): State<Arc<AppState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<WorkloadHistory> {
    let workload = WorkloadRef::new(namespace, name);
    let history = state.scaler.engine().history();

    let samples = history.samples(&workload).await;
    let decisions = history.decisions(&workload).await;
    let mutations = history.mutations(&workload).await;
    if samples.is_empty() && decisions.is_empty() {
        return Err(ApiError::not_found(format!("{} is not tracked", workload)));
    }

    Ok(Json(WorkloadHistory {
        workload,
        samples,
        decisions,
        mutations,
    }))
}

async fn statistics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scaler.engine().history().stats().await)
}

async fn start_autoscale(State(state): State<Arc<AppState>>) -> ApiResult<LoopStatus> {
    state.scaler.config().set_enabled(true).await?;
    state.scaler.start().await;
    Ok(Json(state.scaler.status().await))
}

async fn stop_autoscale(State(state): State<Arc<AppState>>) -> ApiResult<LoopStatus> {
    state.scaler.config().set_enabled(false).await?;
    state.scaler.stop().await;
    Ok(Json(state.scaler.status().await))
}

async fn autoscale_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scaler.status().await)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/config", get(get_config).post(update_config))
        .route("/workloads", get(list_workloads))
        .route("/workloads/:namespace/:name/history", get(workload_history))
        .route("/pods/:namespace/:name", get(workload_detail))
        .route(
            "/api/namespaces/:namespace/pods/:name/resize",
            post(resize_workload),
        )
        .route("/model/info", get(model_info))
        .route("/scale/all", post(scale_all))
        .route("/scale/:namespace/:name", post(scale_workload))
        .route("/decisions", get(recent_decisions))
        .route("/statistics", get(statistics))
        .route("/autoscale/start", post(start_autoscale))
        .route("/autoscale/stop", post(stop_autoscale))
        .route("/autoscale/status", get(autoscale_status))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
