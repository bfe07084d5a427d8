//! Fixed constants and environment-driven configuration.
//!
//! Fixed numeric constants live here as `const`s, not environment-tunable —
//! only the options below are. Mirrors the `HTTP_BIND_ADDRESS`-style env
//! reader used by other axum-fronted services in this ecosystem, with
//! `tracing`-based warnings for options this service parses but does not
//! fully honor (TLS).

use std::env;

/// Audio sample rate, Hz.
pub const SAMPLE_RATE: u32 = 16_000;
/// One PCM chunk's wall-clock duration.
pub const CHUNK_DURATION_MS: u64 = 64;
/// Bytes per chunk: sample_rate * 2 (i16) * chunk_ms / 1000.
pub const CHUNK_SIZE: usize = (SAMPLE_RATE as usize * 2 * CHUNK_DURATION_MS as usize) / 1000;
/// Ring buffer age bound.
pub const MAX_AUDIO_BUFFER_SECONDS: u64 = 30;
/// Retained finalized-utterance cap (FIFO eviction).
pub const MAX_RETAINED_UTTERANCES: usize = 3;
/// Hysteresis smoothing window (consecutive same-verdict windows to flip state).
pub const VAD_SMOOTHING_WINDOW: u32 = 2;
/// Frames combined into one VAD evaluation.
pub const VAD_PROCESS_WINDOW: usize = 10;
/// Frames considered for a tentative transcription call.
pub const TEMPORARY_TRANSCRIPTION_INTERVAL: usize = 20;
/// Longest single committed segment before splitting.
pub const MAX_SEGMENT_DURATION_S: u64 = 30;
/// VAD adaptive threshold bounds and step.
pub const VAD_THRESHOLD_MIN: f32 = 0.3;
pub const VAD_THRESHOLD_MAX: f32 = 0.9;
pub const VAD_THRESHOLD_STEP: f32 = 0.1;
/// Default speech decision threshold exposed via `/vad/config` (separate from
/// the adaptive `current_threshold`, which always starts at `VAD_THRESHOLD_MIN`).
pub const VAD_SPEECH_THRESHOLD: f32 = 0.6;

/// Minimum committed-utterance audio length (~200ms) below which the
/// utterance is dropped rather than transcribed.
pub const MIN_COMMIT_CHUNKS: usize = 2;

/// Transport read timeout per receive.
pub const READ_TIMEOUT_SECS: u64 = 5;
/// Aggregate idle timeout.
pub const IDLE_TIMEOUT_SECS: u64 = 30;
/// Tentative transcription cadence.
pub const TENTATIVE_INTERVAL_SECS: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Environment-derived startup configuration. Read once in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub checkpoint_path: Option<String>,
    pub device: String,
    pub log_level: String,
    pub use_https: bool,
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub debug_audio_enabled: bool,
    pub debug_audio_base_dir: String,
}

impl Config {
    pub fn from_env() -> Self {
        let use_https = env::var("USE_HTTPS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        if use_https {
            tracing::warn!(
                "USE_HTTPS is set but this service always binds plain HTTP; TLS termination is out of scope and must be handled upstream"
            );
        }

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            checkpoint_path: env::var("CHECKPOINT_PATH").ok(),
            device: env::var("DEVICE").unwrap_or_else(|_| "cpu".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            use_https,
            ssl_cert: env::var("SSL_CERT").ok(),
            ssl_key: env::var("SSL_KEY").ok(),
            debug_audio_enabled: env::var("DEBUG_AUDIO_ENABLED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            debug_audio_base_dir: env::var("DEBUG_AUDIO_BASE_DIR")
                .unwrap_or_else(|_| "./debug_audio".to_string()),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Runtime-mutable VAD parameters, exposed through `GET /vad/status` and
/// `POST /vad/config`. Guarded by `Arc<RwLock<_>>` at the call site.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    pub speech_threshold: f32,
    pub smoothing_window: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            speech_threshold: VAD_SPEECH_THRESHOLD,
            smoothing_window: VAD_SMOOTHING_WINDOW,
        }
    }
}

impl RuntimeConfig {
    /// Validates and applies an update, rejecting out-of-range values without
    /// mutating state (spec error kind 5: invalid config update rejected,
    /// previous config retained).
    pub fn apply_update(&mut self, update: RuntimeConfigUpdate) -> Result<(), ConfigError> {
        if let Some(t) = update.speech_threshold {
            if !(VAD_THRESHOLD_MIN..=VAD_THRESHOLD_MAX).contains(&t) {
                return Err(ConfigError::InvalidValue {
                    field: "speech_threshold".to_string(),
                    message: format!(
                        "must be within [{VAD_THRESHOLD_MIN}, {VAD_THRESHOLD_MAX}]"
                    ),
                });
            }
        }
        if let Some(w) = update.smoothing_window {
            if w == 0 || w > 32 {
                return Err(ConfigError::InvalidValue {
                    field: "smoothing_window".to_string(),
                    message: "must be within [1, 32]".to_string(),
                });
            }
        }
        if let Some(t) = update.speech_threshold {
            self.speech_threshold = t;
        }
        if let Some(w) = update.smoothing_window {
            self.smoothing_window = w;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RuntimeConfigUpdate {
    pub speech_threshold: Option<f32>,
    pub smoothing_window: Option<u32>,
}
