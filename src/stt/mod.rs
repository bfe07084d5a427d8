//! Automatic speech recognition (the ASR Engine singleton).
//!
//! Treated as an opaque, logically pure capability: PCM buffer (plus an
//! optional hotwords-derived instruction) in, transcript out. Implementations
//! must be `Send + Sync` so the singleton instance can be shared across
//! connections without additional synchronization beyond what the
//! implementation itself provides.

pub mod stub;
pub mod whisper;

pub use stub::StubSTT;
pub use whisper::WhisperSTT;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// One call's transcription result.
#[derive(Debug, Clone)]
pub struct TranscriptResult {
    pub text: String,
    pub language: String,
    pub confidence: f32,
}

/// Speech-to-text trait. The tree-shaped prompt format some engines build
/// internally (chat templates, instruction tokens) is this trait's business,
/// not its callers' — callers pass a flat `instruction_text` built from
/// hotwords and a token budget; the engine decides how to fold that into
/// whatever request shape it needs.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_initialized(&self) -> bool;

    async fn initialize(&self) -> Result<(), SttError>;

    /// `samples` are float PCM in `[-1, 1]` at 16kHz mono. `instruction_text`
    /// carries the hotwords instruction suffix (see `coordinator.rs`), if
    /// any. `max_new_tokens` bounds generation length — callers pick this per
    /// spec.md §4.4 (small for tentative calls, proportional to duration for
    /// committed calls).
    async fn transcribe(
        &self,
        samples: &[f32],
        instruction_text: Option<&str>,
        max_new_tokens: u32,
    ) -> Result<TranscriptResult, SttError>;
}

/// Normalizes a raw hotwords list per spec.md §4.4: trim, lowercase,
/// dedupe, cap at 10.
pub fn normalize_hotwords(raw: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for word in raw {
        let trimmed = word.trim().to_lowercase();
        if trimmed.is_empty() || !seen.insert(trimmed.clone()) {
            continue;
        }
        out.push(trimmed);
        if out.len() == 10 {
            break;
        }
    }
    out
}

/// Builds the instruction-suffix text passed as `instruction_text`, or
/// `None` if there are no hotwords to bias toward.
pub fn build_instruction(hotwords: &[String]) -> Option<String> {
    if hotwords.is_empty() {
        None
    } else {
        Some(format!("vocabulary hints: {}", hotwords.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_hotwords_trims_lowercases_dedupes_and_caps() {
        let raw: Vec<String> = vec![
            " Rust ".into(),
            "rust".into(),
            "Tokio".into(),
            "Axum".into(),
        ];
        let normalized = normalize_hotwords(&raw);
        assert_eq!(normalized, vec!["rust", "tokio", "axum"]);
    }

    #[test]
    fn normalize_hotwords_caps_at_ten() {
        let raw: Vec<String> = (0..15).map(|i| format!("word{i}")).collect();
        assert_eq!(normalize_hotwords(&raw).len(), 10);
    }

    #[test]
    fn build_instruction_none_when_empty() {
        assert!(build_instruction(&[]).is_none());
    }

    #[test]
    fn build_instruction_joins_hotwords() {
        let hotwords = vec!["rust".to_string(), "tokio".to_string()];
        let instruction = build_instruction(&hotwords).unwrap();
        assert!(instruction.contains("rust"));
        assert!(instruction.contains("tokio"));
    }
}
