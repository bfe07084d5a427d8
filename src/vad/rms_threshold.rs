//! RMS-energy VAD.
//!
//! Fast, primitive voice activity detection using RMS energy. Cannot
//! distinguish speech from background noise (music, TV, etc) — acceptable
//! here since the VAD Controller's hysteresis and adaptive threshold absorb
//! a noisy per-window verdict (see `vad_controller.rs`).

use super::{VadError, VoiceActivityDetection};
use async_trait::async_trait;

pub struct RmsThresholdVAD;

impl RmsThresholdVAD {
    pub fn new() -> Self {
        Self
    }

    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        (sum_squares / samples.len() as f64).sqrt() as f32
    }
}

impl Default for RmsThresholdVAD {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VoiceActivityDetection for RmsThresholdVAD {
    fn name(&self) -> &'static str {
        "rms_threshold"
    }

    fn is_initialized(&self) -> bool {
        true
    }

    async fn initialize(&self) -> Result<(), VadError> {
        Ok(())
    }

    async fn is_speech(&self, window: &[f32], threshold: f32) -> Result<bool, VadError> {
        if window.is_empty() {
            return Err(VadError::InvalidAudio("empty window".into()));
        }
        Ok(Self::rms(window) >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silence_is_not_speech() {
        let vad = RmsThresholdVAD::new();
        let silence = vec![0.0f32; 320];
        assert!(!vad.is_speech(&silence, 0.01).await.unwrap());
    }

    #[tokio::test]
    async fn loud_signal_is_speech() {
        let vad = RmsThresholdVAD::new();
        let loud = vec![0.9f32; 320];
        assert!(vad.is_speech(&loud, 0.3).await.unwrap());
    }

    #[tokio::test]
    async fn empty_window_errors() {
        let vad = RmsThresholdVAD::new();
        assert!(vad.is_speech(&[], 0.3).await.is_err());
    }
}
