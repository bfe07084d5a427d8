//! Whisper ASR Adapter
//!
//! Local Whisper inference using whisper-rs (bindings to whisper.cpp).
//! Runs on CPU with optional GPU acceleration; inference always happens on
//! a blocking thread (see `transcribe`), matching spec.md §5's requirement
//! that ASR calls never stall the ingress path.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{SpeechToText, SttError, TranscriptResult};

/// Whisper model context, loaded once.
static WHISPER_CTX: OnceCell<Arc<Mutex<WhisperContext>>> = OnceCell::new();

/// Whisper requires at least ~1000ms at 16kHz; pad to 1050ms to account for
/// whisper.cpp's internal rounding (it reports ~990ms for exactly 16000
/// samples).
const WHISPER_MIN_SAMPLES: usize = 16_800;

pub struct WhisperSTT {
    model_path: Option<PathBuf>,
}

impl WhisperSTT {
    pub fn new() -> Self {
        Self { model_path: None }
    }

    pub fn with_model_path(model_path: PathBuf) -> Self {
        Self { model_path: Some(model_path) }
    }

    /// Finds the model file in common locations, honoring `WHISPER_MODEL`.
    fn find_model_path(&self) -> PathBuf {
        if let Some(ref path) = self.model_path {
            return path.clone();
        }

        let model_name =
            std::env::var("WHISPER_MODEL").unwrap_or_else(|_| "large-v3-turbo".to_string());

        let model_file = match model_name.as_str() {
            "base" => "ggml-base.en.bin",
            "small" => "ggml-small.en.bin",
            "medium" => "ggml-medium.en.bin",
            "large-v3" => "ggml-large-v3.bin",
            "large-v3-turbo" => "ggml-large-v3-turbo.bin",
            _ => {
                warn!("unknown WHISPER_MODEL='{}', defaulting to large-v3-turbo", model_name);
                "ggml-large-v3-turbo.bin"
            }
        };

        let candidates = [
            PathBuf::from(format!("models/whisper/{model_file}")),
            dirs::data_dir().unwrap_or_default().join(format!("whisper/{model_file}")),
            PathBuf::from(format!("/usr/local/share/whisper/{model_file}")),
        ];

        for path in &candidates {
            if path.exists() {
                return path.clone();
            }
        }

        PathBuf::from(format!("models/whisper/{model_file}"))
    }

    /// Synchronous transcription, run on a blocking thread by `transcribe`.
    fn transcribe_sync(
        ctx: &Arc<Mutex<WhisperContext>>,
        mut samples: Vec<f32>,
        instruction_text: Option<String>,
        max_new_tokens: u32,
    ) -> Result<TranscriptResult, SttError> {
        if samples.is_empty() {
            return Err(SttError::InvalidAudio("empty audio samples".into()));
        }

        if samples.len() < WHISPER_MIN_SAMPLES {
            let original_len = samples.len();
            samples.resize(WHISPER_MIN_SAMPLES, 0.0);
            info!(
                from_ms = (original_len * 1000) / 16000,
                "Whisper: padded audio up to 1050ms with silence"
            );
        }

        let max_sample = samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        if max_sample > 1.5 {
            warn!(max_sample, "audio samples out of range, may need normalization");
        }

        let ctx_guard = ctx.lock();
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        // The hotwords instruction suffix (spec.md §4.4) is folded in as
        // whisper.cpp's initial prompt — the closest concept this engine
        // exposes to "bias decoding toward these words."
        if let Some(instruction) = instruction_text.as_deref() {
            params.set_initial_prompt(instruction);
        }

        params.set_n_threads(num_cpus::get().min(4) as i32);
        params.set_translate(false);
        params.set_no_context(true);
        params.set_single_segment(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        let mut state = ctx_guard
            .create_state()
            .map_err(|e| SttError::InferenceFailed(format!("failed to create state: {e}")))?;

        state
            .full(params, &samples)
            .map_err(|e| SttError::InferenceFailed(format!("inference failed: {e}")))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| SttError::InferenceFailed(format!("failed to get segments: {e}")))?;

        let mut full_text = String::new();
        for i in 0..num_segments {
            let segment_text = state.full_get_segment_text(i).map_err(|e| {
                SttError::InferenceFailed(format!("failed to get segment {i}: {e}"))
            })?;
            full_text.push_str(&segment_text);
        }

        // whisper-rs does not expose a generation token cap; approximate
        // `max_new_tokens` by truncating on word boundaries (roughly one
        // token per word for the budgets spec.md §4.4 uses).
        let truncated: String = full_text
            .split_whitespace()
            .take(max_new_tokens.max(1) as usize)
            .collect::<Vec<_>>()
            .join(" ");

        let detected_lang = state
            .full_lang_id_from_state()
            .map(|id| whisper_rs::get_lang_str(id).unwrap_or("en"))
            .unwrap_or("en")
            .to_string();

        Ok(TranscriptResult {
            text: truncated.trim().to_string(),
            language: detected_lang,
            confidence: 0.9,
        })
    }
}

impl Default for WhisperSTT {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechToText for WhisperSTT {
    fn name(&self) -> &'static str {
        "whisper"
    }

    fn is_initialized(&self) -> bool {
        WHISPER_CTX.get().is_some()
    }

    async fn initialize(&self) -> Result<(), SttError> {
        if WHISPER_CTX.get().is_some() {
            info!("Whisper already initialized");
            return Ok(());
        }

        let model_path = self.find_model_path();
        info!(?model_path, "loading Whisper model");

        if !model_path.exists() {
            warn!(?model_path, "Whisper model not found");
            warn!("download from https://huggingface.co/ggerganov/whisper.cpp/tree/main");
            return Err(SttError::ModelNotLoaded(format!(
                "model not found: {model_path:?}. Download ggml-*.bin from the whisper.cpp HuggingFace repo"
            )));
        }

        let params = WhisperContextParameters::default();
        let ctx = WhisperContext::new_with_params(model_path.to_str().unwrap_or(""), params)
            .map_err(|e| SttError::ModelNotLoaded(e.to_string()))?;

        WHISPER_CTX
            .set(Arc::new(Mutex::new(ctx)))
            .map_err(|_| SttError::ModelNotLoaded("failed to set global context".into()))?;

        info!("Whisper model loaded successfully");
        Ok(())
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        instruction_text: Option<&str>,
        max_new_tokens: u32,
    ) -> Result<TranscriptResult, SttError> {
        let ctx = WHISPER_CTX
            .get()
            .ok_or_else(|| SttError::ModelNotLoaded("Whisper not initialized".into()))?
            .clone();

        let samples = samples.to_vec();
        let instruction = instruction_text.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            Self::transcribe_sync(&ctx, samples, instruction, max_new_tokens)
        })
        .await
        .map_err(|e| SttError::InferenceFailed(format!("task join error: {e}")))?
    }
}
