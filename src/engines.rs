//! Process-wide VAD Engine / ASR Engine singletons.
//!
//! Both engines are expensive to initialize (model loading) and safe to
//! share: `initialize()` runs once at startup, after which every connection
//! borrows the same `Arc<dyn ...>` rather than opening its own model
//! context. Mirrors the teacher's `WHISPER_CTX: OnceCell<...>` pattern one
//! level up, so the rest of the crate depends on the trait objects rather
//! than reaching into `stt::whisper`/`vad::rms_threshold` directly.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::Config;
use crate::error::ServiceError;
use crate::stt::{SpeechToText, StubSTT, WhisperSTT};
use crate::vad::{RmsThresholdVAD, VoiceActivityDetection};

static VAD_ENGINE: OnceCell<Arc<dyn VoiceActivityDetection>> = OnceCell::new();
static ASR_ENGINE: OnceCell<Arc<dyn SpeechToText>> = OnceCell::new();

/// Selects and initializes both engines, honoring `ASR_BACKEND` ("whisper",
/// the default, or "stub" for development/testing without model weights).
/// Idempotent: a second call returns the already-initialized singletons.
pub async fn init(config: &Config) -> Result<(), ServiceError> {
    let vad: Arc<dyn VoiceActivityDetection> = Arc::new(RmsThresholdVAD::new());
    vad.initialize().await?;
    let _ = VAD_ENGINE.set(vad);

    let backend = std::env::var("ASR_BACKEND").unwrap_or_else(|_| "whisper".to_string());
    let asr: Arc<dyn SpeechToText> = match backend.as_str() {
        "stub" => Arc::new(StubSTT::new()),
        _ => match &config.checkpoint_path {
            Some(path) => Arc::new(WhisperSTT::with_model_path(path.into())),
            None => Arc::new(WhisperSTT::new()),
        },
    };
    asr.initialize().await?;
    let _ = ASR_ENGINE.set(asr);

    Ok(())
}

/// Returns the shared VAD Engine. Panics if `init` has not run — callers are
/// only reachable after `main` completes startup.
pub fn vad_engine() -> Arc<dyn VoiceActivityDetection> {
    VAD_ENGINE.get().expect("vad engine not initialized").clone()
}

/// Returns the shared ASR Engine. Panics if `init` has not run.
pub fn asr_engine() -> Arc<dyn SpeechToText> {
    ASR_ENGINE.get().expect("asr engine not initialized").clone()
}
