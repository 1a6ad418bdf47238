//! HTTP telemetry server.
//!
//! Exposes one [`TelemetryFacade`] as JSON. Every caller shares the same
//! engine behind a mutex, so passes never overlap and all consumers see the
//! same snapshot stores and histories.

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::State, http::StatusCode, response::Json, routing::get};
use serde::Serialize;
use tokio::sync::Mutex;

use ratewatch_core::{
    Clock, CounterSource, GpuDevice, HistorySnapshot, ProcfsSource, SystemClock, TelemetryFacade,
    TelemetryReport,
};

/// Shared server state.
struct AppState<S, C> {
    engine: Mutex<TelemetryFacade<S, C>>,
    last_error: Mutex<Option<String>>,
}

#[derive(Serialize)]
struct FailedPass {
    error: String,
    /// Report of the last successful pass, if any.
    stale: Option<TelemetryReport>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    passes: u64,
    gpus: usize,
    failed_families: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

#[derive(Serialize)]
struct GpusResponse {
    devices: Vec<GpuDevice>,
    total: usize,
}

/// Run one pass off the async workers; file reads and `nvidia-smi` block.
async fn run_pass<S, C>(state: Arc<AppState<S, C>>) -> Result<TelemetryReport, FailedPass>
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    let worker = Arc::clone(&state);
    let joined = tokio::task::spawn_blocking(move || {
        let mut engine = worker.engine.blocking_lock();
        engine.sample().map_err(|e| FailedPass {
            error: e.to_string(),
            stale: engine.latest(),
        })
    })
    .await;

    let outcome = joined.unwrap_or_else(|e| {
        Err(FailedPass {
            error: format!("sampling task failed: {e}"),
            stale: None,
        })
    });
    *state.last_error.lock().await = outcome.as_ref().err().map(|f| f.error.clone());
    outcome
}

async fn handle_sample<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
) -> Result<Json<TelemetryReport>, (StatusCode, Json<FailedPass>)>
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    run_pass(state)
        .await
        .map(Json)
        .map_err(|failed| (StatusCode::SERVICE_UNAVAILABLE, Json(failed)))
}

async fn handle_latest<S, C>(
    State(state): State<Arc<AppState<S, C>>>,
) -> Result<Json<TelemetryReport>, (StatusCode, Json<serde_json::Value>)>
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    let engine = state.engine.lock().await;
    engine.latest().map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no pass has completed yet" })),
        )
    })
}

async fn handle_history<S, C>(State(state): State<Arc<AppState<S, C>>>) -> Json<HistorySnapshot>
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    Json(state.engine.lock().await.latest_history())
}

async fn handle_gpus<S, C>(State(state): State<Arc<AppState<S, C>>>) -> Json<GpusResponse>
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    let devices = state.engine.lock().await.gpus();
    let total = devices.len();
    Json(GpusResponse { devices, total })
}

async fn handle_health<S, C>(State(state): State<Arc<AppState<S, C>>>) -> Json<HealthResponse>
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    let (passes, gpus, failed_families) = {
        let engine = state.engine.lock().await;
        let failed: Vec<String> = engine
            .latest()
            .map(|r| r.failed_families.iter().map(|f| f.to_string()).collect())
            .unwrap_or_default();
        (engine.pass_count(), engine.gpus().len(), failed)
    };
    let last_error = state.last_error.lock().await.clone();
    let status = if last_error.is_some() || passes == 0 {
        "degraded"
    } else if failed_families.is_empty() {
        "healthy"
    } else {
        "partial"
    };
    Json(HealthResponse {
        status,
        passes,
        gpus,
        failed_families,
        last_error,
    })
}

async fn handle_index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "ratewatch server",
        "version": ratewatch_core::VERSION,
        "endpoints": {
            "/": "This API index",
            "/api/sample": "Run one sampling pass and return its report (503 with the stale report on failure)",
            "/api/latest": "Report of the most recent successful pass",
            "/api/history": "Rolling 60-point histories for every stream",
            "/api/gpus": "GPUs found at startup",
            "/health": "Pass count and degraded families",
        },
        "units": {
            "percent": "0-100",
            "io": "KB/s",
            "memory": "KB",
            "gpu_memory": "MB",
            "timestamps": "epoch ms",
        }
    }))
}

/// Build the axum router around `engine`.
pub fn build_router<S, C>(engine: TelemetryFacade<S, C>) -> Router
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    router_with_state(Arc::new(AppState {
        engine: Mutex::new(engine),
        last_error: Mutex::new(None),
    }))
}

fn router_with_state<S, C>(state: Arc<AppState<S, C>>) -> Router
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    Router::new()
        .route("/", get(handle_index))
        .route("/api/sample", get(handle_sample::<S, C>))
        .route("/api/latest", get(handle_latest::<S, C>))
        .route("/api/history", get(handle_history::<S, C>))
        .route("/api/gpus", get(handle_gpus::<S, C>))
        .route("/health", get(handle_health::<S, C>))
        .with_state(state)
}

/// Run the HTTP server. With `interval` set, a background task samples on
/// that cadence so `/api/latest` and `/api/history` stay fresh.
pub async fn run_server(
    engine: TelemetryFacade<ProcfsSource, SystemClock>,
    host: &str,
    port: u16,
    interval: Option<Duration>,
) -> std::io::Result<()> {
    let state = Arc::new(AppState {
        engine: Mutex::new(engine),
        last_error: Mutex::new(None),
    });
    if let Some(every) = interval {
        tokio::spawn(sample_periodically(Arc::clone(&state), every));
    }

    let app = router_with_state(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app).await
}

async fn sample_periodically<S, C>(state: Arc<AppState<S, C>>, every: Duration)
where
    S: CounterSource + 'static,
    C: Clock + 'static,
{
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(failed) = run_pass(Arc::clone(&state)).await {
            log::warn!("background pass failed: {}", failed.error);
        }
    }
}
