//! Stub ASR Adapter
//!
//! Returns pre-configured transcriptions for development/testing without
//! requiring model weights. Useful for exercising the Coordinator's
//! tentative/committed scheduling logic against deterministic text.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{SpeechToText, SttError, TranscriptResult};

/// Confidence score returned by the stub (0.0-1.0).
const STUB_CONFIDENCE: f32 = 0.95;

/// Stub ASR adapter. Returns dummy transcriptions sized to the audio
/// length and, if present, echoes the hotwords instruction into the text so
/// tests can assert it was actually threaded through.
pub struct StubSTT {
    initialized: AtomicBool,
}

impl StubSTT {
    pub fn new() -> Self {
        Self { initialized: AtomicBool::new(false) }
    }

    fn generate_dummy_text(&self, duration_ms: i64, instruction_text: Option<&str>) -> String {
        let base = match duration_ms {
            0..=999 => "Test.".to_string(),
            1000..=1999 => "Test audio transcription.".to_string(),
            2000..=2999 => "This is a test audio transcription from the stub adapter.".to_string(),
            _ => format!(
                "This is a test transcription for audio duration of {duration_ms} milliseconds."
            ),
        };
        match instruction_text {
            Some(instruction) => format!("{base} [{instruction}]"),
            None => base,
        }
    }
}

#[async_trait]
impl SpeechToText for StubSTT {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    async fn initialize(&self) -> Result<(), SttError> {
        tracing::info!("StubSTT: initializing (no-op)");
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        instruction_text: Option<&str>,
        _max_new_tokens: u32,
    ) -> Result<TranscriptResult, SttError> {
        if !self.is_initialized() {
            return Err(SttError::ModelNotLoaded("stub STT not initialized".to_string()));
        }
        if samples.is_empty() {
            return Err(SttError::InvalidAudio("empty audio samples".to_string()));
        }

        let duration_ms = (samples.len() as i64 * 1000) / 16000;
        let text = self.generate_dummy_text(duration_ms, instruction_text);

        tracing::debug!(duration_ms, text = %text, "StubSTT: generated dummy transcription");

        Ok(TranscriptResult { text, language: "en".to_string(), confidence: STUB_CONFIDENCE })
    }
}

impl Default for StubSTT {
    fn default() -> Self {
        Self::new()
    }
}
