//! Frame and Utterance data types.
//!
//! `Frame` is generalized from the audio-frame shape this pipeline descends
//! from: instead of pre-decoded `Vec<i16>` samples, it carries raw
//! `Vec<u8>` PCM, because Frame Ingress receives arbitrary binary payloads
//! off the wire and must normalize odd-sized tails before any sample-level
//! decoding happens (see `ingress.rs`).

use std::time::Instant;

use crate::config::CHUNK_SIZE;

/// One fixed-size PCM chunk, stamped with a monotonic id and capture time.
///
/// Invariant: `pcm.len() == CHUNK_SIZE` for every admitted frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_id: u64,
    pub captured_at: Instant,
    pub pcm: Vec<u8>,
    pub processed: bool,
}

impl Frame {
    pub fn new(frame_id: u64, captured_at: Instant, pcm: Vec<u8>) -> Self {
        debug_assert_eq!(pcm.len(), CHUNK_SIZE, "frame pcm must be exactly one chunk");
        Self {
            frame_id,
            captured_at,
            pcm,
            processed: false,
        }
    }

    /// Decode this frame's PCM to signed 16-bit little-endian samples.
    pub fn as_i16_samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}

/// A contiguous range of frames classified as speech.
///
/// `end_frame_id == -1` marks an utterance still open. At most one utterance
/// is open per connection at a time (enforced by `AudioRingBuffer`).
#[derive(Debug, Clone)]
pub struct Utterance {
    pub start_frame_id: u64,
    pub start_time: Instant,
    pub end_frame_id: i64,
    pub end_time: Option<Instant>,
    pub transcript: String,
    pub finalized: bool,
}

impl Utterance {
    pub fn open(start_frame_id: u64, start_time: Instant) -> Self {
        Self {
            start_frame_id,
            start_time,
            end_frame_id: -1,
            end_time: None,
            transcript: String::new(),
            finalized: false,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.finalized
    }

    /// Duration once finalized; `None` while still open.
    pub fn duration(&self) -> Option<std::time::Duration> {
        let end_time = self.end_time?;
        Some(end_time.saturating_duration_since(self.start_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_decodes_little_endian_samples() {
        let pcm = vec![0x01, 0x00, 0xff, 0xff];
        let mut frame_pcm = pcm.clone();
        frame_pcm.resize(CHUNK_SIZE, 0);
        let frame = Frame::new(0, Instant::now(), frame_pcm);
        let samples = frame.as_i16_samples();
        assert_eq!(samples[0], 1);
        assert_eq!(samples[1], -1);
    }

    #[test]
    fn utterance_starts_open_and_unfinalized() {
        let u = Utterance::open(5, Instant::now());
        assert!(u.is_open());
        assert_eq!(u.end_frame_id, -1);
        assert!(u.duration().is_none());
    }
}
