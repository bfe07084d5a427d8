//! Plain JSON introspection/config endpoints: `GET /health`,
//! `GET /debug/config`, `GET /vad/status`, `POST /vad/config`.
//!
//! These read/write the process-wide `Arc<RwLock<RuntimeConfig>>` that
//! seeds every new connection's own per-connection copy — updates here
//! change defaults for connections made from this point on, not sockets
//! already streaming (those are only reachable through their own
//! `vad_config` WS control message).

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::batch;
use crate::config::{Config, RuntimeConfig, RuntimeConfigUpdate};
use crate::connection;
use crate::error::ServiceError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub runtime: Arc<parking_lot::RwLock<RuntimeConfig>>,
}

/// Builds the full axum router: the `/stream` WebSocket upgrade, the batch
/// `/transcribe/file` endpoint, and the plain-JSON introspection endpoints.
/// CORS is wide open (the teacher's `ingest-srt` gateway does the same for
/// its demo surface); this service has no cross-origin-sensitive cookies or
/// auth to protect.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/stream", get(connection::ws_handler))
        .route("/transcribe/file", post(batch::transcribe_file))
        .route("/health", get(health))
        .route("/debug/config", get(debug_config))
        .route("/vad/status", get(vad_status))
        .route("/vad/config", post(vad_config))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthBody { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

#[derive(Serialize)]
struct DebugConfigBody {
    host: String,
    port: u16,
    device: String,
    log_level: String,
    use_https: bool,
    ssl_configured: bool,
    debug_audio_enabled: bool,
    debug_audio_base_dir: String,
    runtime: RuntimeConfig,
}

pub async fn debug_config(State(state): State<AppState>) -> impl IntoResponse {
    let cfg = &state.config;
    Json(DebugConfigBody {
        host: cfg.host.clone(),
        port: cfg.port,
        device: cfg.device.clone(),
        log_level: cfg.log_level.clone(),
        use_https: cfg.use_https,
        ssl_configured: cfg.ssl_cert.is_some() && cfg.ssl_key.is_some(),
        debug_audio_enabled: cfg.debug_audio_enabled,
        debug_audio_base_dir: cfg.debug_audio_base_dir.clone(),
        runtime: state.runtime.read().clone(),
    })
}

pub async fn vad_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runtime.read().clone())
}

pub async fn vad_config(
    State(state): State<AppState>,
    Json(update): Json<RuntimeConfigUpdate>,
) -> Result<impl IntoResponse, ServiceError> {
    let mut cfg = state.runtime.write();
    cfg.apply_update(update)?;
    Ok(Json(cfg.clone()))
}
