//! HTTP endpoint server using Axum

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use crate::core::runtime::AppRuntime;
use crate::core::scheduler::{MonitorScheduler, SchedulerRun};
use crate::db::SignalFilter;
use crate::error::RepositoryError;
use crate::jobs::SignalMonitor;
use crate::metrics::Metrics;
use crate::models::{ExitReason, MarketType, ScanRequest, SignalDirection};
use crate::repository::SignalRepository;

#[derive(Clone)]
pub struct AppState {
    pub repository: Arc<SignalRepository>,
    pub monitor: Arc<SignalMonitor>,
    pub scheduler: Option<Arc<MonitorScheduler>>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
}

impl AppState {
    pub fn from_runtime(runtime: &AppRuntime) -> Self {
        Self {
            repository: runtime.repository.clone(),
            monitor: runtime.monitor.clone(),
            scheduler: Some(runtime.scheduler.clone()),
            metrics: runtime.metrics.clone(),
            start_time: Arc::new(Instant::now()),
        }
    }
}

/// Repository failure rendered as an HTTP error
pub struct ApiFailure(pub RepositoryError);

impl From<RepositoryError> for ApiFailure {
    fn from(e: RepositoryError) -> Self {
        ApiFailure(e)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RepositoryError::DuplicateFollow(_) => StatusCode::CONFLICT,
            RepositoryError::NotFound(_) => StatusCode::NOT_FOUND,
            RepositoryError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
            RepositoryError::Remote(_) => StatusCode::BAD_GATEWAY,
            RepositoryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, status = %status, "Request failed");
        }
        (
            status,
            Json(json!({ "success": false, "error": self.0.to_string() })),
        )
            .into_response()
    }
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let uptime_seconds = state.start_time.elapsed().as_secs();
    let scheduler_running = match &state.scheduler {
        Some(scheduler) => scheduler.is_running().await,
        None => false,
    };
    Json(json!({
        "status": "healthy",
        "uptime_seconds": uptime_seconds,
        "scheduler_running": scheduler_running,
        "service": "signalwatch"
    }))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();
    let response = next.run(request).await;
    state.metrics.http_requests_in_flight.dec();

    let status = response.status();
    let duration = start.elapsed();
    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

#[derive(Debug, Default, Deserialize)]
struct SignalQuery {
    market: Option<MarketType>,
    strategy: Option<String>,
    direction: Option<SignalDirection>,
    #[serde(default)]
    favorites: bool,
    search: Option<String>,
}

impl SignalQuery {
    fn filter(self) -> SignalFilter {
        if self.favorites {
            SignalFilter::Favorites
        } else if let Some(market) = self.market {
            SignalFilter::Market(market)
        } else if let Some(strategy) = self.strategy {
            SignalFilter::Strategy(strategy)
        } else if let Some(direction) = self.direction {
            SignalFilter::Direction(direction)
        } else if let Some(search) = self.search {
            SignalFilter::Search(search)
        } else {
            SignalFilter::All
        }
    }
}

async fn list_signals(
    State(state): State<AppState>,
    Query(params): Query<SignalQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let signals = state.repository.signals(&params.filter()).await?;
    Ok(Json(json!(signals)))
}

#[derive(Debug, Deserialize)]
struct SyncQuery {
    hours: Option<u32>,
}

async fn sync_signals(
    State(state): State<AppState>,
    Query(params): Query<SyncQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let signals = state
        .repository
        .sync_signals(params.hours.unwrap_or(24))
        .await?;
    Ok(Json(json!({ "synced": signals.len(), "signals": signals })))
}

async fn perform_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Result<Json<Value>, ApiFailure> {
    let response = state.repository.perform_scan(&request).await?;
    Ok(Json(json!(response)))
}

async fn follow_signal(
    State(state): State<AppState>,
    Path(signal_id): Path<i64>,
) -> Result<(StatusCode, Json<Value>), ApiFailure> {
    let followed = state.repository.follow_signal_by_id(signal_id).await?;
    Ok((StatusCode::CREATED, Json(json!(followed))))
}

#[derive(Debug, Deserialize)]
struct FollowedQuery {
    #[serde(default)]
    active_only: bool,
}

async fn list_followed(
    State(state): State<AppState>,
    Query(params): Query<FollowedQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let followed = if params.active_only {
        state.repository.active_followed_signals().await?
    } else {
        state.repository.all_followed_signals().await?
    };
    Ok(Json(json!(followed)))
}

#[derive(Debug, Deserialize)]
struct UnfollowQuery {
    exit_reason: Option<ExitReason>,
    exit_price: Option<f64>,
}

async fn stop_following(
    State(state): State<AppState>,
    Path(followed_id): Path<i64>,
    Query(params): Query<UnfollowQuery>,
) -> Result<Json<Value>, ApiFailure> {
    let record = state
        .repository
        .stop_following(
            followed_id,
            params.exit_reason.unwrap_or(ExitReason::Manual),
            params.exit_price,
        )
        .await?;
    Ok(Json(json!(record)))
}

async fn clear_inactive_followed(State(state): State<AppState>) -> Result<Json<Value>, ApiFailure> {
    let deleted = state.repository.clear_inactive_followed().await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn trigger_monitor(State(state): State<AppState>) -> Json<Value> {
    let run = match &state.scheduler {
        Some(scheduler) => scheduler.trigger_now().await,
        None => SchedulerRun::Completed(state.monitor.run_cycle().await),
    };
    match run {
        SchedulerRun::Completed(report) => Json(json!({ "status": "completed", "report": report })),
        SchedulerRun::SkippedBusy => Json(json!({ "status": "skipped_busy" })),
        SchedulerRun::SkippedOffline => Json(json!({ "status": "skipped_offline" })),
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/signals", get(list_signals))
        .route("/api/signals/sync", post(sync_signals))
        .route("/api/scan", post(perform_scan))
        .route("/api/signals/{id}/follow", post(follow_signal))
        .route("/api/followed", get(list_followed))
        .route("/api/followed/inactive", delete(clear_inactive_followed))
        .route("/api/followed/{id}", delete(stop_following))
        .route("/api/monitor/check", post(trigger_monitor))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    info!(
        "Metrics endpoint available at http://0.0.0.0:{}/metrics",
        port
    );
    axum::serve(listener, app).await?;

    Ok(())
}
