//! Audio ring buffer.
//!
//! Generalizes the fixed-capacity const-generic slot array this pipeline's
//! queues once used into a wall-clock-bounded, frame-id-indexed store:
//! callers need arbitrary `range(lo, hi)` queries and age-based eviction,
//! neither of which a fixed-`N` circular array supports. The concurrency
//! shape survives unchanged — a single `parking_lot::Mutex`-guarded interior,
//! callers holding ids rather than references, so `append` and eviction can
//! never race a `range`/`commit_pcm` read.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{CHUNK_SIZE, MAX_AUDIO_BUFFER_SECONDS, MAX_RETAINED_UTTERANCES};
use crate::frame::{Frame, Utterance};

struct Inner {
    frames: BTreeMap<u64, Frame>,
    next_frame_id: u64,
    open: Option<Utterance>,
    utterances: VecDeque<Utterance>,
    last_eviction: Instant,
}

/// Per-connection store of recent frames and finalized utterance records.
///
/// Owned exclusively by one connection; written by Frame Ingress, read by
/// the VAD Controller and the Transcription Coordinator.
pub struct AudioRingBuffer {
    inner: Mutex<Inner>,
}

impl AudioRingBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: BTreeMap::new(),
                next_frame_id: 0,
                open: None,
                utterances: VecDeque::new(),
                last_eviction: Instant::now(),
            }),
        }
    }

    /// Appends one chunk, assigning it the next monotonic frame id.
    /// Triggers eviction if at least a second has elapsed since the last one.
    pub fn append(&self, pcm: Vec<u8>) -> Frame {
        let mut inner = self.inner.lock();
        let frame_id = inner.next_frame_id;
        inner.next_frame_id += 1;
        let frame = Frame::new(frame_id, Instant::now(), pcm);
        inner.frames.insert(frame_id, frame.clone());

        if inner.last_eviction.elapsed() >= Duration::from_secs(1) {
            Self::evict(&mut inner);
        }

        frame
    }

    fn evict(inner: &mut Inner) {
        inner.last_eviction = Instant::now();
        let cutoff = Instant::now() - Duration::from_secs(MAX_AUDIO_BUFFER_SECONDS);

        // Never evict frames within [open.start_frame_id, latest] for the
        // currently open utterance.
        let protect_from = inner.open.as_ref().map(|u| u.start_frame_id);

        inner.frames.retain(|&id, frame| {
            if let Some(protect_from) = protect_from {
                if id >= protect_from {
                    return true;
                }
            }
            frame.captured_at >= cutoff
        });
    }

    /// Up to the newest `max_n` frames with `processed == false`, ascending
    /// by frame id.
    pub fn recent_unprocessed(&self, max_n: usize) -> Vec<Frame> {
        let inner = self.inner.lock();
        let mut unprocessed: Vec<&Frame> = inner.frames.values().filter(|f| !f.processed).collect();
        unprocessed.sort_by_key(|f| f.frame_id);
        let len = unprocessed.len();
        let start = len.saturating_sub(max_n);
        unprocessed[start..].iter().map(|f| (*f).clone()).collect()
    }

    /// Marks the given frame ids as processed (VAD has consumed them).
    pub fn mark_processed(&self, ids: &[u64]) {
        let mut inner = self.inner.lock();
        for id in ids {
            if let Some(frame) = inner.frames.get_mut(id) {
                frame.processed = true;
            }
        }
    }

    /// Frames with `lo <= frame_id <= hi` that are still present.
    pub fn range(&self, lo: u64, hi: u64) -> Vec<Frame> {
        let inner = self.inner.lock();
        inner.frames.range(lo..=hi).map(|(_, f)| f.clone()).collect()
    }

    /// Up to the most recent `max_n` frames of the currently open utterance,
    /// never reaching below `open.start_frame_id`.
    pub fn recent_open_utterance_frames(&self, max_n: usize) -> Vec<Frame> {
        let inner = self.inner.lock();
        let Some(open) = inner.open.as_ref() else {
            return Vec::new();
        };
        let latest = inner.frames.keys().next_back().copied().unwrap_or(open.start_frame_id);
        let lo = latest.saturating_sub(max_n as u64 - 1).max(open.start_frame_id);
        inner.frames.range(lo..=latest).map(|(_, f)| f.clone()).collect()
    }

    pub fn open_utterance(&self) -> Option<Utterance> {
        self.inner.lock().open.clone()
    }

    /// Starts a new open utterance at `frame_id`. If one is already open,
    /// it is force-finalized at `(new.start_frame_id - 1, t)` first.
    pub fn start_utterance(&self, frame_id: u64, t: Instant) {
        let mut inner = self.inner.lock();
        if inner.open.is_some() {
            let forced_end = frame_id.saturating_sub(1) as i64;
            Self::finalize_locked(&mut inner, forced_end, t);
        }
        inner.open = Some(Utterance::open(frame_id, t));
    }

    /// Finalizes the open utterance, returning it. Panics if none is open —
    /// callers (the VAD Controller) only invoke this after observing
    /// `speaking == true`, which implies an open utterance exists.
    pub fn finalize_utterance(&self, end_frame_id: u64, t: Instant) -> Utterance {
        let mut inner = self.inner.lock();
        Self::finalize_locked(&mut inner, end_frame_id as i64, t)
    }

    fn finalize_locked(inner: &mut Inner, end_frame_id: i64, t: Instant) -> Utterance {
        let mut utt = inner
            .open
            .take()
            .expect("finalize_utterance called with no open utterance");
        utt.end_frame_id = end_frame_id;
        utt.end_time = Some(t);
        utt.finalized = true;

        inner.utterances.push_back(utt.clone());
        while inner.utterances.len() > MAX_RETAINED_UTTERANCES {
            inner.utterances.pop_front();
        }

        utt
    }

    /// Concatenates PCM for frames in `[utt.start_frame_id, latest_frame_id]`
    /// into one contiguous buffer.
    pub fn commit_pcm(&self, utt: &Utterance) -> Vec<u8> {
        let inner = self.inner.lock();
        let latest = inner
            .frames
            .keys()
            .next_back()
            .copied()
            .unwrap_or(utt.start_frame_id);
        let hi = if utt.end_frame_id >= 0 {
            utt.end_frame_id as u64
        } else {
            latest
        };
        let mut pcm = Vec::with_capacity(inner.frames.len() * CHUNK_SIZE);
        for (_, frame) in inner.frames.range(utt.start_frame_id..=hi) {
            pcm.extend_from_slice(&frame.pcm);
        }
        pcm
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn retained_utterances(&self) -> Vec<Utterance> {
        self.inner.lock().utterances.iter().cloned().collect()
    }

    /// Sets the final transcript text on the retained utterance starting at
    /// `start_frame_id` (a no-op if it has already aged out of the retained
    /// cap). Used by the Coordinator once committed transcription — possibly
    /// split across sub-segments — has produced the full text.
    pub fn set_transcript(&self, start_frame_id: u64, transcript: String) {
        let mut inner = self.inner.lock();
        if let Some(utt) = inner.utterances.iter_mut().find(|u| u.start_frame_id == start_frame_id) {
            utt.transcript = transcript;
        }
    }

    /// Most recent frame id observed, if any.
    pub fn last_frame_id(&self) -> Option<u64> {
        self.inner.lock().frames.keys().next_back().copied()
    }
}

impl Default for AudioRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> Vec<u8> {
        vec![0u8; CHUNK_SIZE]
    }

    #[test]
    fn append_assigns_dense_monotonic_ids() {
        let ring = AudioRingBuffer::new();
        for i in 0..5 {
            let frame = ring.append(chunk());
            assert_eq!(frame.frame_id, i);
        }
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn recent_unprocessed_returns_ascending_order() {
        let ring = AudioRingBuffer::new();
        for _ in 0..5 {
            ring.append(chunk());
        }
        let recent = ring.recent_unprocessed(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].frame_id, 2);
        assert_eq!(recent[2].frame_id, 4);
    }

    #[test]
    fn starting_new_utterance_force_finalizes_previous() {
        let ring = AudioRingBuffer::new();
        for _ in 0..10 {
            ring.append(chunk());
        }
        ring.start_utterance(2, Instant::now());
        ring.start_utterance(7, Instant::now());

        let retained = ring.retained_utterances();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].start_frame_id, 2);
        assert_eq!(retained[0].end_frame_id, 6);

        let open = ring.open_utterance().unwrap();
        assert_eq!(open.start_frame_id, 7);
    }

    #[test]
    fn commit_pcm_concatenates_frame_range() {
        let ring = AudioRingBuffer::new();
        for _ in 0..5 {
            ring.append(chunk());
        }
        ring.start_utterance(1, Instant::now());
        let utt = ring.finalize_utterance(3, Instant::now());
        let pcm = ring.commit_pcm(&utt);
        assert_eq!(pcm.len(), 3 * CHUNK_SIZE);
    }

    #[test]
    fn retained_utterances_capped_fifo() {
        let ring = AudioRingBuffer::new();
        for _ in 0..20 {
            ring.append(chunk());
        }
        for i in 0..5u64 {
            let start = i * 2;
            ring.start_utterance(start, Instant::now());
            ring.finalize_utterance(start + 1, Instant::now());
        }
        // last start_utterance leaves nothing open, so finalize the final one
        assert!(ring.retained_utterances().len() <= MAX_RETAINED_UTTERANCES);
    }

    #[test]
    fn set_transcript_updates_retained_record() {
        let ring = AudioRingBuffer::new();
        for _ in 0..5 {
            ring.append(chunk());
        }
        ring.start_utterance(0, Instant::now());
        ring.finalize_utterance(4, Instant::now());
        ring.set_transcript(0, "hello world".to_string());
        let retained = ring.retained_utterances();
        assert_eq!(retained[0].transcript, "hello world");
    }
}
