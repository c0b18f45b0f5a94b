//! HTTP trigger server.
//!
//! Lets schedulers and operators start a sync over HTTP and read back the
//! result of the last run.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service info and endpoint list |
//! | `GET`  | `/health` | Liveness probe |
//! | `POST` | `/sync` | Run a sync (`{"async": bool, "source": "all"}`) |
//! | `GET`  | `/status` | Result of the last run |
//!
//! Only one run is active at a time. A `POST /sync` that arrives while a run
//! is in progress gets `409 busy`. With `ksync serve --schedule` the daily
//! scheduler runs in the same process and takes the same run lock, so a
//! scheduled run and an HTTP-triggered one never overlap, and `GET /status`
//! reports whichever ran last.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "Unknown sync target: 'wiki'" } }
//! ```
//!
//! Error codes: `bad_request` (400), `busy` (409), `sync_failed` (500).

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::scheduler;
use crate::sync_cmd::{sync_target, RunSummary, SyncTarget};

/// Executes one sync run. The production runner builds everything from
/// config; tests substitute their own.
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run(&self, target: SyncTarget) -> anyhow::Result<RunSummary>;
}

/// Runner backed by the configured connectors, ledger, and destination.
pub struct ConfigRunner {
    config: Arc<Config>,
}

impl ConfigRunner {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SyncRunner for ConfigRunner {
    async fn run(&self, target: SyncTarget) -> anyhow::Result<RunSummary> {
        sync_target(&self.config, target).await
    }
}

/// Record of the most recent run, as served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct LastRun {
    pub status: &'static str,
    /// `http` or `schedule`.
    pub trigger: &'static str,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Shared state for all handlers.
///
/// `run_lock` doubles as the "a run is active" flag: it is held for the
/// whole run, including detached async runs.
#[derive(Clone)]
pub struct AppState {
    runner: Arc<dyn SyncRunner>,
    run_lock: Arc<Mutex<()>>,
    last_run: Arc<RwLock<Option<LastRun>>>,
}

impl AppState {
    pub fn new(runner: Arc<dyn SyncRunner>) -> Self {
        Self {
            runner,
            run_lock: Arc::new(Mutex::new(())),
            last_run: Arc::new(RwLock::new(None)),
        }
    }

    /// Run `target` unless another run holds the lock, and record it as the
    /// last run. Returns `None` without running when busy.
    pub async fn run_exclusive(&self, target: SyncTarget, trigger: &'static str) -> Option<LastRun> {
        let _guard = self.run_lock.clone().try_lock_owned().ok()?;
        let record = execute(self.runner.as_ref(), target, trigger).await;
        *self.last_run.write().await = Some(record.clone());
        Some(record)
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/sync", post(handle_sync))
        .route("/status", get(handle_status))
        .layer(cors)
        .with_state(state)
}

/// `ksync serve`: bind `[server].bind` and serve until terminated.
///
/// With `schedule`, the daily scheduler shares this server's state.
pub async fn run_server(config: &Config, schedule: bool) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let runner = Arc::new(ConfigRunner::new(Arc::new(config.clone())));
    let state = AppState::new(runner);

    if schedule {
        let (hour, minute) = (config.schedule.hour, config.schedule.minute);
        let scheduled = state.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler::schedule_loop(scheduled, hour, minute).await {
                tracing::error!(error = %e, "scheduler stopped");
            }
        });
        println!(
            "Scheduled sync all daily at {:02}:{:02} local time",
            hour, minute
        );
    }

    let app = router(state);
    println!("Sync server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn busy() -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "busy",
        message: "a sync run is already in progress".to_string(),
    }
}

fn sync_failed(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "sync_failed",
        message: message.into(),
    }
}

// ============ Handlers ============

#[derive(Debug, Deserialize)]
struct SyncRequest {
    #[serde(default, rename = "async")]
    run_async: bool,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    "all".to_string()
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            run_async: false,
            source: default_source(),
        }
    }
}

async fn handle_index() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "knowledge-sync",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "GET /": "service info",
            "GET /health": "liveness probe",
            "POST /sync": "run a sync; body {\"async\": bool, \"source\": \"all\"|\"issue\"|\"page\"}",
            "GET /status": "result of the last run",
        }
    }))
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "knowledge-sync",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn handle_status(State(state): State<AppState>) -> Response {
    let running = state.run_lock.try_lock().is_err();
    match state.last_run.read().await.clone() {
        Some(last) => Json(serde_json::json!({
            "running": running,
            "last_run": last,
        }))
        .into_response(),
        None => Json(serde_json::json!({
            "running": running,
            "status": "never_run",
        }))
        .into_response(),
    }
}

async fn handle_sync(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let request: SyncRequest = if body.iter().all(|b| b.is_ascii_whitespace()) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid body: {}", e)))?
    };
    let target: SyncTarget = request.source.parse().map_err(bad_request)?;

    let guard = state.run_lock.clone().try_lock_owned().map_err(|_| busy())?;

    if request.run_async {
        let runner = state.runner.clone();
        let last_run = state.last_run.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let record = execute(runner.as_ref(), target, "http").await;
            *last_run.write().await = Some(record);
        });
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "started", "source": request.source })),
        )
            .into_response());
    }

    let record = execute(state.runner.as_ref(), target, "http").await;
    *state.last_run.write().await = Some(record.clone());
    drop(guard);

    match (&record.summary, &record.error) {
        (Some(summary), _) => Ok(Json(summary).into_response()),
        (None, Some(error)) => Err(sync_failed(error.clone())),
        (None, None) => Err(sync_failed("run produced no result")),
    }
}

async fn execute(runner: &dyn SyncRunner, target: SyncTarget, trigger: &'static str) -> LastRun {
    let started_at = Utc::now();
    let source = target.to_string();
    tracing::info!(source = source.as_str(), trigger, "sync triggered");
    let result = runner.run(target).await;
    let finished_at = Utc::now();

    match result {
        Ok(summary) => LastRun {
            status: if summary.success { "success" } else { "failed" },
            trigger,
            target: source,
            started_at,
            finished_at,
            summary: Some(summary),
            error: None,
        },
        Err(e) => {
            tracing::error!(error = %e, "sync run could not start");
            LastRun {
                status: "failed",
                trigger,
                target: source,
                started_at,
                finished_at,
                summary: None,
                error: Some(format!("{:#}", e)),
            }
        }
    }
}
