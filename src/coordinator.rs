//! Transcription Coordinator.
//!
//! Drives both transcription paths off the VAD Controller's events plus its
//! own 1Hz timer (spec.md §4.4):
//!
//! - Tentative: while an utterance is open, once a second, transcribe the
//!   most recent `TEMPORARY_TRANSCRIPTION_INTERVAL` frames and emit a
//!   `TentativeOutput`. Never written back to the ring buffer — tentative
//!   text is presentation-only.
//! - Committed: once the VAD Controller finalizes an utterance, transcribe
//!   its full PCM (splitting into `{handle}_part_{n}` sub-segments if it
//!   exceeds `MAX_SEGMENT_DURATION_S`) and emit one `CommittedOutput` per
//!   sub-segment, then write the joined transcript back onto the retained
//!   utterance record.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::{
    CHUNK_DURATION_MS, MAX_SEGMENT_DURATION_S, MIN_COMMIT_CHUNKS, TEMPORARY_TRANSCRIPTION_INTERVAL,
    TENTATIVE_INTERVAL_SECS,
};
use crate::debug_audio::DebugAudioWriter;
use crate::emitter::Emitter;
use crate::event::VadEvent;
use crate::frame::Utterance;
use crate::handle::Handle;
use crate::ring::AudioRingBuffer;
use crate::stt::{build_instruction, SpeechToText};
use crate::vad::normalize_i16;

/// Frames worth of PCM per committed sub-segment split point.
fn max_segment_frames() -> usize {
    ((MAX_SEGMENT_DURATION_S * 1000) / CHUNK_DURATION_MS) as usize
}

pub struct Coordinator {
    ring: Arc<AudioRingBuffer>,
    asr: Arc<dyn SpeechToText>,
    emitter: Arc<Emitter>,
    debug_audio: Arc<DebugAudioWriter>,
    hotwords: Vec<String>,
    events: mpsc::Receiver<VadEvent>,
    connection_started: Instant,
    /// Cleared on `UtteranceStarted`, appended to by every tentative call
    /// for the currently open utterance (spec.md §3 `CoordinatorState`).
    accumulated_tentative_text: String,
}

impl Coordinator {
    pub fn new(
        ring: Arc<AudioRingBuffer>,
        asr: Arc<dyn SpeechToText>,
        emitter: Arc<Emitter>,
        debug_audio: Arc<DebugAudioWriter>,
        hotwords: Vec<String>,
        events: mpsc::Receiver<VadEvent>,
    ) -> Self {
        Self {
            ring,
            asr,
            emitter,
            debug_audio,
            hotwords,
            events,
            connection_started: Instant::now(),
            accumulated_tentative_text: String::new(),
        }
    }

    /// Runs until `cancel` fires or the event channel closes (the VAD
    /// Controller task has exited).
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tentative_ticker = interval(Duration::from_secs(TENTATIVE_INTERVAL_SECS));
        tentative_ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("coordinator: cancelled");
                    return;
                }
                event = self.events.recv() => {
                    match event {
                        Some(VadEvent::UtteranceStarted { .. }) => {
                            self.accumulated_tentative_text.clear();
                        }
                        Some(VadEvent::UtteranceEnded { utterance }) => {
                            self.handle_committed(utterance).await;
                        }
                        Some(_) => {}
                        None => {
                            tracing::debug!("coordinator: event channel closed");
                            return;
                        }
                    }
                }
                _ = tentative_ticker.tick() => {
                    self.handle_tentative().await;
                }
            }
        }
    }

    async fn handle_tentative(&mut self) {
        if self.ring.open_utterance().is_none() {
            return;
        }
        let frames = self.ring.recent_open_utterance_frames(TEMPORARY_TRANSCRIPTION_INTERVAL);
        if frames.is_empty() {
            return;
        }

        let start_chunk_id = frames.first().expect("non-empty").frame_id;
        let end_chunk_id = frames.last().expect("non-empty").frame_id;
        let samples: Vec<i16> = frames.iter().flat_map(|f| f.as_i16_samples()).collect();
        let floats = normalize_i16(&samples);
        let duration_s = (end_chunk_id - start_chunk_id + 1) as f64 * CHUNK_DURATION_MS as f64
            / 1000.0;

        let instruction = build_instruction(&self.hotwords);
        let call_started = Instant::now();
        // Small fixed budget for latency (spec.md §4.4 tentative path step 2).
        match self.asr.transcribe(&floats, instruction.as_deref(), 15).await {
            Ok(result) => {
                let processing_delay = call_started.elapsed().as_secs_f64();
                // Simple concatenation, not replacement -- spec.md §9 open
                // question preserves this literally even though it can
                // produce duplicative text across overlapping ticks.
                self.accumulated_tentative_text.push_str(&result.text);
                self.emitter
                    .send_tentative(
                        result.text,
                        self.accumulated_tentative_text.clone(),
                        start_chunk_id,
                        end_chunk_id,
                        duration_s,
                        processing_delay,
                    )
                    .await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "tentative transcription failed");
            }
        }
    }

    async fn handle_committed(&self, utterance: Utterance) {
        let pcm = self.ring.commit_pcm(&utterance);
        if pcm.len() < MIN_COMMIT_CHUNKS * crate::config::CHUNK_SIZE {
            tracing::debug!(
                start_frame_id = utterance.start_frame_id,
                bytes = pcm.len(),
                "committed utterance too short, dropping"
            );
            return;
        }

        self.debug_audio.write_utterance(utterance.start_frame_id, &pcm);

        let handle = Handle::new();
        let max_frames = max_segment_frames();
        let total_frames =
            (utterance.end_frame_id - utterance.start_frame_id as i64 + 1).max(1) as usize;

        if total_frames <= max_frames {
            self.transcribe_segment(&utterance, &pcm, handle.to_string(), utterance.start_frame_id, utterance.end_frame_id as u64)
                .await;
            return;
        }

        tracing::info!(
            total_frames,
            max_frames,
            "utterance exceeds max segment duration, splitting"
        );

        let mut joined = String::new();
        // 1-based per spec.md §8 scenario 3: `_part_1/_part_2/_part_3`.
        let mut part = 1u32;
        let mut frame_cursor = utterance.start_frame_id;

        for chunk in pcm.chunks(max_frames * crate::config::CHUNK_SIZE) {
            let frames_in_chunk =
                (chunk.len() / crate::config::CHUNK_SIZE).max(1) as u64;
            let end_frame = frame_cursor + frames_in_chunk - 1;
            let segment_id = format!("{handle}_part_{part}");
            if let Some(text) =
                self.transcribe_segment(&utterance, chunk, segment_id, frame_cursor, end_frame).await
            {
                if !joined.is_empty() {
                    joined.push(' ');
                }
                joined.push_str(&text);
            }
            frame_cursor = end_frame + 1;
            part += 1;
        }

        self.ring.set_transcript(utterance.start_frame_id, joined);
    }

    /// Transcribes and emits one committed segment, returning its text on
    /// success so split callers can join sub-segment text.
    async fn transcribe_segment(
        &self,
        utterance: &Utterance,
        pcm: &[u8],
        segment_id: String,
        start_chunk_id: u64,
        end_chunk_id: u64,
    ) -> Option<String> {
        let samples: Vec<i16> =
            pcm.chunks_exact(2).map(|b| i16::from_le_bytes([b[0], b[1]])).collect();
        let floats = normalize_i16(&samples);
        let duration_s = samples.len() as f64 / crate::config::SAMPLE_RATE as f64;

        let instruction = build_instruction(&self.hotwords);
        // clamp(50 + 5*duration_s, 50, 200) per spec.md §4.4 committed path step 3.
        let max_new_tokens = (duration_s * 5.0 + 50.0).clamp(50.0, 200.0) as u32;

        match self.asr.transcribe(&floats, instruction.as_deref(), max_new_tokens).await {
            Ok(result) => {
                let start_time = start_chunk_id as f64 * CHUNK_DURATION_MS as f64 / 1000.0;
                let end_time = (end_chunk_id + 1) as f64 * CHUNK_DURATION_MS as f64 / 1000.0;
                self.emitter
                    .send_committed(
                        result.text.clone(),
                        segment_id,
                        start_chunk_id,
                        end_chunk_id,
                        start_time,
                        end_time,
                        duration_s,
                        pcm.len(),
                    )
                    .await;
                if utterance.start_frame_id == start_chunk_id {
                    self.ring.set_transcript(utterance.start_frame_id, result.text.clone());
                }
                Some(result.text)
            }
            Err(err) => {
                tracing::warn!(error = %err, segment = %segment_id, "committed transcription failed");
                None
            }
        }
    }

    pub fn uptime(&self) -> Duration {
        self.connection_started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CHUNK_SIZE;
    use crate::protocol::ServerMessage;
    use crate::stt::{SttError, TranscriptResult};
    use async_trait::async_trait;

    struct EchoStt;

    #[async_trait]
    impl SpeechToText for EchoStt {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn is_initialized(&self) -> bool {
            true
        }
        async fn initialize(&self) -> Result<(), SttError> {
            Ok(())
        }
        async fn transcribe(
            &self,
            samples: &[f32],
            instruction_text: Option<&str>,
            _max_new_tokens: u32,
        ) -> Result<TranscriptResult, SttError> {
            Ok(TranscriptResult {
                text: format!("len={} instr={:?}", samples.len(), instruction_text),
                language: "en".into(),
                confidence: 0.8,
            })
        }
    }

    fn setup() -> (Coordinator, Arc<AudioRingBuffer>, mpsc::Sender<VadEvent>, mpsc::Receiver<ServerMessage>)
    {
        let ring = Arc::new(AudioRingBuffer::new());
        let asr: Arc<dyn SpeechToText> = Arc::new(EchoStt);
        let (msg_tx, msg_rx) = mpsc::channel(16);
        let emitter = Arc::new(Emitter::new(msg_tx));
        let debug_audio = Arc::new(DebugAudioWriter::new(false, "/tmp", "test"));
        let (ev_tx, ev_rx) = mpsc::channel(16);
        let coordinator =
            Coordinator::new(ring.clone(), asr, emitter, debug_audio, vec![], ev_rx);
        (coordinator, ring, ev_tx, msg_rx)
    }

    #[tokio::test]
    async fn short_committed_utterance_is_dropped() {
        let (coordinator, ring, _ev_tx, mut msg_rx) = setup();
        for _ in 0..3 {
            ring.append(vec![0u8; CHUNK_SIZE]);
        }
        ring.start_utterance(0, Instant::now());
        let utt = ring.finalize_utterance(0, Instant::now());
        coordinator.handle_committed(utt).await;
        assert!(msg_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn normal_length_utterance_emits_one_committed_output() {
        let (coordinator, ring, _ev_tx, mut msg_rx) = setup();
        for _ in 0..5 {
            ring.append(vec![0u8; CHUNK_SIZE]);
        }
        ring.start_utterance(0, Instant::now());
        let utt = ring.finalize_utterance(4, Instant::now());
        coordinator.handle_committed(utt).await;
        let msg = msg_rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::CommittedOutput { .. }));
        let retained = ring.retained_utterances();
        assert!(!retained[0].transcript.is_empty());
    }

    #[tokio::test]
    async fn tentative_tick_is_noop_without_open_utterance() {
        let (mut coordinator, _ring, _ev_tx, mut msg_rx) = setup();
        coordinator.handle_tentative().await;
        assert!(msg_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tentative_tick_emits_while_utterance_open() {
        let (mut coordinator, ring, _ev_tx, mut msg_rx) = setup();
        for _ in 0..5 {
            ring.append(vec![0u8; CHUNK_SIZE]);
        }
        ring.start_utterance(0, Instant::now());
        coordinator.handle_tentative().await;
        let msg = msg_rx.recv().await.unwrap();
        match msg {
            ServerMessage::TentativeOutput { current_text, text, confidence, .. } => {
                assert_eq!(confidence, "tentative");
                assert_eq!(current_text, text, "single tick: chunk equals accumulated text");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn tentative_accumulates_across_ticks_then_clears_on_utterance_started() {
        let (mut coordinator, ring, _ev_tx, mut msg_rx) = setup();
        for _ in 0..5 {
            ring.append(vec![0u8; CHUNK_SIZE]);
        }
        ring.start_utterance(0, Instant::now());
        coordinator.handle_tentative().await;
        let first = match msg_rx.recv().await.unwrap() {
            ServerMessage::TentativeOutput { text, .. } => text,
            _ => panic!("wrong variant"),
        };
        coordinator.handle_tentative().await;
        let second = match msg_rx.recv().await.unwrap() {
            ServerMessage::TentativeOutput { current_text, text, .. } => {
                assert!(text.len() > current_text.len(), "accumulated text grows across ticks");
                text
            }
            _ => panic!("wrong variant"),
        };
        assert!(second.starts_with(&first));
        assert_eq!(coordinator.accumulated_tentative_text, second);

        coordinator.accumulated_tentative_text.clear();
        assert!(coordinator.accumulated_tentative_text.is_empty());
    }
}
