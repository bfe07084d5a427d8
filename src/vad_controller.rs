//! VAD Controller.
//!
//! Converts the frame stream into an utterance-level segmentation under
//! noisy conditions, using hysteresis smoothing and an adaptive threshold
//! that resists mid-utterance drop-outs (spec.md §4.3). Runs on a
//! `tokio::time::interval(chunk_duration_ms)` ticker owned by the
//! connection task, the same tokio-interval idiom the teacher's
//! `call_server.rs` uses for its server-driven audio loop.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::config::{
    RuntimeConfig, VAD_PROCESS_WINDOW, VAD_THRESHOLD_MAX, VAD_THRESHOLD_MIN, VAD_THRESHOLD_STEP,
};
use crate::event::VadEvent;
use crate::frame::Frame;
use crate::ring::AudioRingBuffer;
use crate::vad::{normalize_i16, VoiceActivityDetection};

/// Per-connection VAD state (spec.md §3).
#[derive(Debug, Clone)]
pub struct VadControllerState {
    pub current_threshold: f32,
    pub speaking: bool,
    pub speech_count: u32,
    pub silence_count: u32,
    pub accumulator: Vec<Frame>,
    pub utterance_open_since: Option<u64>,
}

impl VadControllerState {
    fn new() -> Self {
        Self {
            current_threshold: VAD_THRESHOLD_MIN,
            speaking: false,
            speech_count: 0,
            silence_count: 0,
            accumulator: Vec::new(),
            utterance_open_since: None,
        }
    }
}

impl Default for VadControllerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only snapshot published after every tick, for `get_state` /
/// `GET /vad/status` introspection without reaching into the controller
/// itself (which lives inside its own ticker task).
#[derive(Debug, Clone, Copy, Default)]
pub struct VadSnapshot {
    pub speaking: bool,
    pub current_threshold: f32,
}

pub struct VadController {
    engine: Arc<dyn VoiceActivityDetection>,
    ring: Arc<AudioRingBuffer>,
    runtime: Arc<RwLock<RuntimeConfig>>,
    events: mpsc::Sender<VadEvent>,
    snapshot: Arc<RwLock<VadSnapshot>>,
    state: VadControllerState,
}

impl VadController {
    pub fn new(
        engine: Arc<dyn VoiceActivityDetection>,
        ring: Arc<AudioRingBuffer>,
        runtime: Arc<RwLock<RuntimeConfig>>,
        events: mpsc::Sender<VadEvent>,
        snapshot: Arc<RwLock<VadSnapshot>>,
    ) -> Self {
        Self { engine, ring, runtime, events, snapshot, state: VadControllerState::new() }
    }

    /// One controller tick: drains unprocessed frames from the ring buffer
    /// into the accumulator, then processes as many complete
    /// `VAD_PROCESS_WINDOW`-sized windows as are available.
    pub async fn tick(&mut self) {
        let unprocessed = self.ring.recent_unprocessed(usize::MAX);
        if !unprocessed.is_empty() {
            let ids: Vec<u64> = unprocessed.iter().map(|f| f.frame_id).collect();
            self.ring.mark_processed(&ids);
            self.state.accumulator.extend(unprocessed);
        }
        self.process_windows().await;
        self.publish_snapshot();
    }

    async fn process_windows(&mut self) {
        let smoothing_window = self.runtime.read().smoothing_window.max(1);

        while self.state.accumulator.len() >= VAD_PROCESS_WINDOW {
            let window: Vec<Frame> = self.state.accumulator.drain(..VAD_PROCESS_WINDOW).collect();
            let first_id = window.first().expect("window non-empty").frame_id;
            let last_id = window.last().expect("window non-empty").frame_id;

            let mut samples: Vec<i16> = Vec::with_capacity(window.len() * window[0].pcm.len() / 2);
            for frame in &window {
                samples.extend(frame.as_i16_samples());
            }
            let floats = normalize_i16(&samples);

            let verdict = match self.engine.is_speech(&floats, self.state.current_threshold).await
            {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(error = %err, "VAD engine failed, clearing accumulator");
                    self.state.accumulator.clear();
                    return;
                }
            };

            self.apply_verdict(verdict, smoothing_window, first_id, last_id).await;
        }
    }

    async fn apply_verdict(
        &mut self,
        is_speech: bool,
        smoothing_window: u32,
        first_id: u64,
        last_id: u64,
    ) {
        if is_speech {
            self.state.speech_count = (self.state.speech_count + 1).min(smoothing_window);
            self.state.silence_count = self.state.silence_count.saturating_sub(1);
        } else {
            self.state.silence_count = (self.state.silence_count + 1).min(smoothing_window);
            self.state.speech_count = self.state.speech_count.saturating_sub(1);
        }

        let was_speaking = self.state.speaking;

        if !was_speaking && self.state.speech_count >= 1 {
            self.state.speaking = true;
            self.state.utterance_open_since = Some(first_id);
            self.ring.start_utterance(first_id, Instant::now());
            self.state.current_threshold =
                (self.state.current_threshold + VAD_THRESHOLD_STEP).min(VAD_THRESHOLD_MAX);
            let _ = self.events.send(VadEvent::UtteranceStarted { start_frame_id: first_id }).await;
        } else if was_speaking && self.state.speech_count > 0 {
            self.state.current_threshold =
                (self.state.current_threshold + 0.3 * VAD_THRESHOLD_STEP).min(VAD_THRESHOLD_MAX);
            let _ = self
                .events
                .send(VadEvent::UtteranceExtended { speech_count: self.state.speech_count })
                .await;
        } else if was_speaking && self.state.silence_count >= smoothing_window {
            self.state.speaking = false;
            self.state.utterance_open_since = None;
            self.state.current_threshold = VAD_THRESHOLD_MIN;
            let utterance = self.ring.finalize_utterance(last_id, Instant::now());
            let _ = self.events.send(VadEvent::UtteranceEnded { utterance }).await;
        } else if !was_speaking && self.state.silence_count >= smoothing_window {
            self.state.current_threshold = VAD_THRESHOLD_MIN;
        }

        self.state.current_threshold =
            self.state.current_threshold.clamp(VAD_THRESHOLD_MIN, VAD_THRESHOLD_MAX);
    }

    fn publish_snapshot(&self) {
        *self.snapshot.write() = VadSnapshot {
            speaking: self.state.speaking,
            current_threshold: self.state.current_threshold,
        };
    }

    pub fn state(&self) -> &VadControllerState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuntimeConfig, CHUNK_SIZE, VAD_PROCESS_WINDOW};
    use crate::vad::VadError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedVad {
        verdicts: Vec<bool>,
        call: AtomicUsize,
    }

    #[async_trait]
    impl VoiceActivityDetection for ScriptedVad {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn is_initialized(&self) -> bool {
            true
        }
        async fn initialize(&self) -> Result<(), VadError> {
            Ok(())
        }
        async fn is_speech(&self, _window: &[f32], _threshold: f32) -> Result<bool, VadError> {
            let i = self.call.fetch_add(1, Ordering::SeqCst);
            Ok(*self.verdicts.get(i).unwrap_or(&false))
        }
    }

    struct FailingVad;

    #[async_trait]
    impl VoiceActivityDetection for FailingVad {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn is_initialized(&self) -> bool {
            true
        }
        async fn initialize(&self) -> Result<(), VadError> {
            Ok(())
        }
        async fn is_speech(&self, _window: &[f32], _threshold: f32) -> Result<bool, VadError> {
            Err(VadError::InferenceFailed("boom".into()))
        }
    }

    fn push_frames(ring: &AudioRingBuffer, n: usize) {
        for _ in 0..n {
            ring.append(vec![0u8; CHUNK_SIZE]);
        }
    }

    fn setup(
        engine: Arc<dyn VoiceActivityDetection>,
    ) -> (VadController, Arc<AudioRingBuffer>, mpsc::Receiver<VadEvent>) {
        let ring = Arc::new(AudioRingBuffer::new());
        let runtime = Arc::new(RwLock::new(RuntimeConfig::default()));
        let (tx, rx) = mpsc::channel(16);
        let snapshot = Arc::new(RwLock::new(VadSnapshot::default()));
        let controller = VadController::new(engine, ring.clone(), runtime, tx, snapshot);
        (controller, ring, rx)
    }

    #[tokio::test]
    async fn silence_keeps_threshold_at_minimum() {
        let engine = Arc::new(ScriptedVad { verdicts: vec![false; 10], call: AtomicUsize::new(0) });
        let (mut controller, ring, _rx) = setup(engine);
        push_frames(&ring, VAD_PROCESS_WINDOW);
        controller.tick().await;
        assert_eq!(controller.state().current_threshold, VAD_THRESHOLD_MIN);
        assert!(!controller.state().speaking);
    }

    #[tokio::test]
    async fn two_speech_windows_open_an_utterance() {
        let engine = Arc::new(ScriptedVad { verdicts: vec![true; 10], call: AtomicUsize::new(0) });
        let (mut controller, ring, mut rx) = setup(engine);
        push_frames(&ring, VAD_PROCESS_WINDOW);
        controller.tick().await;
        // default smoothing_window is 2: first speech window bumps speech_count
        // to 1 which already flips speaking (>=1 threshold), matching spec.md.
        assert!(controller.state().speaking);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, VadEvent::UtteranceStarted { .. }));
    }

    #[tokio::test]
    async fn threshold_never_leaves_bounds() {
        let verdicts: Vec<bool> = (0..40).map(|i| i % 3 != 0).collect();
        let engine = Arc::new(ScriptedVad { verdicts, call: AtomicUsize::new(0) });
        let (mut controller, ring, mut rx) = setup(engine);
        for _ in 0..4 {
            push_frames(&ring, VAD_PROCESS_WINDOW);
            controller.tick().await;
            assert!(controller.state().current_threshold >= VAD_THRESHOLD_MIN);
            assert!(controller.state().current_threshold <= VAD_THRESHOLD_MAX);
        }
        while rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn engine_failure_clears_accumulator_without_touching_counters() {
        let engine = Arc::new(FailingVad);
        let (mut controller, ring, _rx) = setup(engine);
        push_frames(&ring, VAD_PROCESS_WINDOW);
        let speech_before = controller.state().speech_count;
        controller.tick().await;
        assert!(controller.state().accumulator.is_empty());
        assert_eq!(controller.state().speech_count, speech_before);
    }
}
