//! REST routes under `/api`.
//!
//! Every failure is rendered as `{"error": "..."}` by [`ApiError`], so API
//! callers never have to parse a framework-generated plain-text body.
//!
//! # Routes
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET  | `/api/ws` | realtime channel (see [`super::ws`]) |
//! | GET  | `/api/state` | state of every adapter |
//! | POST | `/api/serial` | run a command on the diagnostic link |
//! | POST | `/api/serial/reset_edk` | send the firmware reset command |
//! | GET  | `/api/streamer/:name` | stream state |
//! | POST | `/api/streamer/:name/reset` | restart the pipeline |
//! | POST | `/api/streamer/:name/set_params` | change pipeline parameters |
//! | GET  | `/api/streamer/:name/snapshot` | hold the stream up until it works |
//! | GET  | `/api/battery` | last battery values sent |
//! | POST | `/api/battery/set_simulation_percent` | simulated charge level |
//! | POST | `/api/battery/{simulated,real,detach}` | battery mode |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use kvmd_core::{BatteryError, BatteryMode};

use super::serial::battery::{BatteryService, BatteryServiceError};
use super::serial::watchdog::WatchdogSerialClient;
use super::serial::SerialError;
use crate::application::{
    ComponentRegistry, RealtimeHub, SnapshotHolds, StateAggregator, StreamHandle, StreamPipeline,
};
use crate::domain::{stage_params, ParamError};

/// Header carrying the shared API token.
pub const TOKEN_HEADER: &str = "x-kvmd-token";

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);
const SNAPSHOT_POLL: Duration = Duration::from_millis(100);

// ── Errors ────────────────────────────────────────────────────────────────────

/// An API failure with its HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<SerialError> for ApiError {
    fn from(e: SerialError) -> Self {
        match e {
            SerialError::EmptyCommand => Self::BadRequest("No command provided".to_string()),
            SerialError::Open { .. } => {
                error!("Serial error: {e}");
                Self::Internal("Failed to open serial connection".to_string())
            }
            SerialError::NoResponse => Self::Internal("No response from serial device".to_string()),
            other => {
                error!("Serial error: {other}");
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<ParamError> for ApiError {
    fn from(e: ParamError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<BatteryServiceError> for ApiError {
    fn from(e: BatteryServiceError) -> Self {
        match e {
            BatteryServiceError::Encode(
                err @ (BatteryError::PercentOutOfRange(_) | BatteryError::UnsupportedMode { .. }),
            ) => Self::BadRequest(err.to_string()),
            BatteryServiceError::Encode(err) => Self::Internal(err.to_string()),
            BatteryServiceError::Serial(err) => Self::from(err),
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn ok(result: Value) -> ApiResult {
    Ok(Json(json!({ "ok": true, "result": result })))
}

// ── Auth ──────────────────────────────────────────────────────────────────────

/// Decides whether a request may proceed.
pub trait AuthChecker: Send + Sync {
    fn is_allowed(&self, token: Option<&str>) -> bool;
}

/// Shared-token check.  With no token configured every request is allowed.
pub struct TokenAuth {
    token: Option<String>,
}

impl TokenAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }
}

impl AuthChecker for TokenAuth {
    fn is_allowed(&self, token: Option<&str>) -> bool {
        match &self.token {
            None => true,
            Some(expected) => token == Some(expected.as_str()),
        }
    }
}

fn request_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(TOKEN_HEADER) {
        return value.to_str().ok().map(str::to_string);
    }
    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut query)| query.remove("token"))
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request_token(&request);
    if !state.auth.is_allowed(token.as_deref()) {
        warn!("Rejected unauthenticated request to {}", request.uri().path());
        return Err(ApiError::Unauthorized("Unauthorized".to_string()));
    }
    Ok(next.run(request).await)
}

// ── State ─────────────────────────────────────────────────────────────────────

/// What the HTTP layer needs to reach one stream.
#[derive(Clone)]
pub struct StreamEntry {
    pub pipeline: Arc<dyn StreamPipeline>,
    pub handle: StreamHandle,
    pub snapshots: SnapshotHolds,
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    pub aggregator: Arc<StateAggregator>,
    pub registry: Arc<ComponentRegistry>,
    pub serial: Arc<Mutex<WatchdogSerialClient>>,
    pub reset_command: Arc<str>,
    pub battery: Arc<BatteryService>,
    pub streams: Arc<HashMap<String, StreamEntry>>,
    pub auth: Arc<dyn AuthChecker>,
}

impl AppState {
    fn stream(&self, name: &str) -> Result<&StreamEntry, ApiError> {
        self.streams
            .get(name)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown stream: {name}")))
    }
}

/// Builds the `/api` router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ws", get(super::ws::ws_handler))
        .route("/api/state", get(get_state))
        .route("/api/serial", post(serial_command))
        .route("/api/serial/reset_edk", post(serial_reset_edk))
        .route("/api/streamer/:name", get(streamer_state))
        .route("/api/streamer/:name/reset", post(streamer_reset))
        .route("/api/streamer/:name/set_params", post(streamer_set_params))
        .route("/api/streamer/:name/snapshot", get(streamer_snapshot))
        .route("/api/battery", get(battery_state))
        .route("/api/battery/set_simulation_percent", post(battery_set_percent))
        .route("/api/battery/simulated", post(battery_simulated))
        .route("/api/battery/real", post(battery_real))
        .route("/api/battery/detach", post(battery_detach))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<AppState>) -> ApiResult {
    let result: serde_json::Map<String, Value> =
        state.registry.collect_states().await.into_iter().collect();
    ok(Value::Object(result))
}

#[derive(Debug, Deserialize)]
struct SerialCommand {
    #[serde(default)]
    cmd: String,
}

async fn run_serial(state: &AppState, command: &str) -> ApiResult {
    let response = state.serial.lock().await.request(command).await?;
    info!("Serial response: {response}");
    Ok(Json(json!({
        "message": "Command processed successfully",
        "response": response,
    })))
}

async fn serial_command(
    State(state): State<AppState>,
    body: Result<Json<SerialCommand>, JsonRejection>,
) -> ApiResult {
    let command = body.map(|Json(b)| b.cmd).unwrap_or_default();
    info!("Received serial command: {command:?}");
    run_serial(&state, &command).await
}

async fn serial_reset_edk(State(state): State<AppState>) -> ApiResult {
    let command = Arc::clone(&state.reset_command);
    info!("Sending firmware reset command");
    run_serial(&state, &command).await
}

async fn streamer_state(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let entry = state.stream(&name)?;
    ok(entry.pipeline.get_state().await)
}

async fn streamer_reset(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    state.stream(&name)?.handle.request_reset();
    ok(json!({}))
}

async fn streamer_set_params(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult {
    let entry = state.stream(&name)?;
    let current = entry.pipeline.get_params().await;
    let staged = stage_params(&current, &query)?;
    entry.handle.request_params(staged.clone());
    ok(json!({ "params": staged }))
}

async fn streamer_snapshot(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let entry = state.stream(&name)?;
    match take_snapshot(entry).await {
        Some(result) => ok(result),
        None => Err(ApiError::Unavailable(format!("Stream {name} is not available"))),
    }
}

/// Holds the stream up until its pipeline works, then returns its state.
/// `None` when the pipeline did not come up within [`SNAPSHOT_TIMEOUT`].
///
/// Each call takes its own hold, so overlapping snapshots keep the stream up
/// until the last one finishes.  The hold is also released if the request
/// is dropped midway.
async fn take_snapshot(entry: &StreamEntry) -> Option<Value> {
    let _hold = entry.snapshots.hold(&entry.handle);
    tokio::time::timeout(SNAPSHOT_TIMEOUT, async {
        while !entry.pipeline.is_working().await {
            tokio::time::sleep(SNAPSHOT_POLL).await;
        }
    })
    .await
    .ok()?;
    Some(entry.pipeline.get_state().await)
}

async fn battery_state(State(state): State<AppState>) -> ApiResult {
    ok(state.battery.state_json().await)
}

#[derive(Debug, Deserialize)]
struct PercentBody {
    percent: u8,
}

async fn battery_set_percent(
    State(state): State<AppState>,
    body: Result<Json<PercentBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    state.battery.set_percent(body.percent).await?;
    ok(state.battery.state_json().await)
}

async fn set_battery_mode(state: &AppState, mode: BatteryMode) -> ApiResult {
    state.battery.set_mode(mode).await?;
    ok(state.battery.state_json().await)
}

async fn battery_simulated(State(state): State<AppState>) -> ApiResult {
    set_battery_mode(&state, BatteryMode::Simulated).await
}

async fn battery_real(State(state): State<AppState>) -> ApiResult {
    set_battery_mode(&state, BatteryMode::Real).await
}

async fn battery_detach(State(state): State<AppState>) -> ApiResult {
    set_battery_mode(&state, BatteryMode::Detach).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
