//! Crate-wide error aggregation.
//!
//! Component errors (`VadError`, `AsrError`, ...) are defined next to their
//! components and fold into `ServiceError` at the edges — the WS handler and
//! the HTTP handlers — the way a typical axum service maps errors to
//! responses. Inside a component, propagate with `?` against the
//! component-local error type; only convert to `ServiceError` at a boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::config::ConfigError;
use crate::stt::SttError;
use crate::vad::VadError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("vad engine error: {0}")]
    VadEngine(#[from] VadError),

    #[error("asr engine error: {0}")]
    AsrEngine(#[from] SttError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Transport(_) => "transport_error",
            ServiceError::VadEngine(_) => "vad_engine_error",
            ServiceError::AsrEngine(_) => "asr_engine_error",
            ServiceError::Config(_) => "config_error",
            ServiceError::ResourceExhausted(_) => "resource_exhausted",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::Config(_) => StatusCode::BAD_REQUEST,
            ServiceError::ResourceExhausted(_) => StatusCode::INSUFFICIENT_STORAGE,
            ServiceError::VadEngine(_) | ServiceError::AsrEngine(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
