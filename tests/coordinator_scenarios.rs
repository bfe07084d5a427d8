//! Concrete scenarios from spec.md §8 driving `Coordinator::run` end to end:
//! an over-long utterance splitting into exactly `ceil(duration / 30s)`
//! committed outputs, and a disconnect mid-utterance producing none.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voxstream::config::{CHUNK_DURATION_MS, CHUNK_SIZE};
use voxstream::coordinator::Coordinator;
use voxstream::debug_audio::DebugAudioWriter;
use voxstream::emitter::Emitter;
use voxstream::event::VadEvent;
use voxstream::protocol::ServerMessage;
use voxstream::ring::AudioRingBuffer;
use voxstream::stt::{SpeechToText, SttError, TranscriptResult};

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
        _instruction_text: Option<&str>,
        _max_new_tokens: u32,
    ) -> Result<TranscriptResult, SttError> {
        Ok(TranscriptResult { text: format!("words-{}", samples.len()), language: "en".into(), confidence: 0.9 })
    }
}

fn setup() -> (
    Coordinator,
    Arc<AudioRingBuffer>,
    mpsc::Sender<VadEvent>,
    mpsc::Receiver<ServerMessage>,
) {
    let ring = Arc::new(AudioRingBuffer::new());
    let asr: Arc<dyn SpeechToText> = Arc::new(EchoStt);
    let (msg_tx, msg_rx) = mpsc::channel(64);
    let emitter = Arc::new(Emitter::new(msg_tx));
    let debug_audio = Arc::new(DebugAudioWriter::new(false, "/tmp", "test-coordinator"));
    let (ev_tx, ev_rx) = mpsc::channel(16);
    let coordinator = Coordinator::new(ring.clone(), asr, emitter, debug_audio, vec![], ev_rx);
    (coordinator, ring, ev_tx, msg_rx)
}

fn frames_per_segment() -> u64 {
    (30 * 1000 / CHUNK_DURATION_MS) as u64
}

#[tokio::test]
async fn scenario_3_over_long_utterance_splits_into_three_committed_outputs() {
    let (coordinator, ring, ev_tx, mut msg_rx) = setup();

    // 75 seconds of audio: frames_per_segment() * 2.5, rounded up to the
    // nearest chunk, so the coordinator must split into exactly 3 parts.
    let frames_per_seg = frames_per_segment();
    let total_frames = frames_per_seg * 2 + frames_per_seg / 2;
    for _ in 0..total_frames {
        ring.append(vec![0u8; CHUNK_SIZE]);
    }
    ring.start_utterance(0, Instant::now());
    let utterance = ring.finalize_utterance(total_frames as i64 - 1, Instant::now());

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(coordinator.run(run_cancel));

    ev_tx.send(VadEvent::UtteranceEnded { utterance }).await.unwrap();

    let mut committed = Vec::new();
    for _ in 0..3 {
        match tokio::time::timeout(std::time::Duration::from_secs(5), msg_rx.recv()).await {
            Ok(Some(ServerMessage::CommittedOutput { segment_id, .. })) => committed.push(segment_id),
            other => panic!("expected a CommittedOutput, got {other:?}"),
        }
    }

    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(committed.len(), 3);
    assert!(committed[0].ends_with("_part_1"));
    assert!(committed[1].ends_with("_part_2"));
    assert!(committed[2].ends_with("_part_3"));

    let retained = ring.retained_utterances();
    assert_eq!(retained.len(), 1);
    assert!(!retained[0].transcript.is_empty());
}

#[tokio::test]
async fn scenario_6_disconnect_mid_utterance_emits_no_committed_output() {
    let (coordinator, ring, ev_tx, mut msg_rx) = setup();

    for _ in 0..5 {
        ring.append(vec![0u8; CHUNK_SIZE]);
    }
    ring.start_utterance(0, Instant::now());

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let handle = tokio::spawn(coordinator.run(run_cancel));

    // Disconnect (cancel) before any VadEvent::UtteranceEnded is ever sent --
    // the open utterance is simply abandoned, same as a dropped connection.
    cancel.cancel();
    handle.await.unwrap();
    drop(ev_tx);

    assert!(msg_rx.try_recv().is_err(), "no committed output should have been emitted");
    let open = ring.open_utterance();
    assert!(open.is_some(), "the utterance stays open -- it was never finalized by the VAD side");
}
