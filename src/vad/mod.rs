//! Voice Activity Detection.
//!
//! The VAD Engine is treated as an opaque, logically pure capability: buffer
//! in, speech verdict out. Implementations must be `Send + Sync` so the
//! singleton instance can be shared across connections without additional
//! synchronization beyond what the implementation itself provides.

use async_trait::async_trait;

pub mod rms_threshold;

pub use rms_threshold::RmsThresholdVAD;

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("model not loaded: {0}")]
    ModelNotLoaded(String),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A detected speech interval, in sample offsets relative to a whole buffer.
/// Used by the batch file endpoint's whole-buffer segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechInterval {
    pub start_sample: usize,
    pub end_sample: usize,
}

/// Voice activity detection trait. Implementations are runtime-swappable
/// behind the process-wide singleton in `engines.rs`.
#[async_trait]
pub trait VoiceActivityDetection: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_initialized(&self) -> bool;

    async fn initialize(&self) -> Result<(), VadError>;

    /// Scores one window of float PCM samples (normalized to `[-1, 1]`)
    /// against `threshold`, returning a boolean speech verdict.
    async fn is_speech(&self, window: &[f32], threshold: f32) -> Result<bool, VadError>;

    /// Runs whole-buffer segmentation by sliding non-overlapping
    /// `window_len`-sample windows over `buffer` and merging contiguous
    /// speech windows into intervals. Used by the batch file endpoint, which
    /// reuses the same VAD contract as streaming rather than a distinct
    /// algorithm.
    async fn speech_intervals(
        &self,
        buffer: &[f32],
        threshold: f32,
        window_len: usize,
    ) -> Result<Vec<SpeechInterval>, VadError> {
        let mut intervals = Vec::new();
        let mut current: Option<SpeechInterval> = None;

        for (i, window) in buffer.chunks(window_len.max(1)).enumerate() {
            let speech = self.is_speech(window, threshold).await?;
            let start = i * window_len;
            let end = start + window.len();
            if speech {
                match current.as_mut() {
                    Some(interval) => interval.end_sample = end,
                    None => current = Some(SpeechInterval { start_sample: start, end_sample: end }),
                }
            } else if let Some(interval) = current.take() {
                intervals.push(interval);
            }
        }
        if let Some(interval) = current {
            intervals.push(interval);
        }

        Ok(intervals)
    }
}

/// Normalizes signed 16-bit PCM to float samples in `[-1, 1]`.
pub fn normalize_i16(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
}
