//! Frame Ingress.
//!
//! Normalizes arbitrary-sized binary payloads from the client transport into
//! fixed-size `Frame`s per spec.md §4.1, stamping each with the next
//! monotonic frame id by delegating to `AudioRingBuffer::append`. PCM-only:
//! control-message parsing lives in `protocol.rs` and is dispatched by the
//! connection task, not here.

use std::time::Instant;

use crate::config::CHUNK_SIZE;
use crate::frame::Frame;
use crate::ring::AudioRingBuffer;

pub struct FrameIngress {
    last_activity: Instant,
}

impl FrameIngress {
    pub fn new() -> Self {
        Self { last_activity: Instant::now() }
    }

    /// Normalizes `payload` per the four rules in spec.md §4.1 and appends
    /// each admitted frame to `ring`, returning them in admission order.
    pub fn admit(&mut self, payload: &[u8], ring: &AudioRingBuffer) -> Vec<Frame> {
        if payload.is_empty() {
            tracing::warn!("dropping empty frame payload");
            return Vec::new();
        }

        self.last_activity = Instant::now();
        let mut admitted = Vec::new();

        if payload.len() == CHUNK_SIZE {
            admitted.push(ring.append(payload.to_vec()));
        } else if payload.len() < CHUNK_SIZE {
            let mut padded = payload.to_vec();
            padded.resize(CHUNK_SIZE, 0);
            admitted.push(ring.append(padded));
        } else {
            let full_frames = payload.len() / CHUNK_SIZE;
            for i in 0..full_frames {
                let start = i * CHUNK_SIZE;
                admitted.push(ring.append(payload[start..start + CHUNK_SIZE].to_vec()));
            }
            let tail = payload.len() % CHUNK_SIZE;
            if tail != 0 {
                tracing::debug!(tail_bytes = tail, "dropping trailing partial chunk");
            }
        }

        admitted
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

impl Default for FrameIngress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_admits_nothing() {
        let ring = AudioRingBuffer::new();
        let mut ingress = FrameIngress::new();
        let frames = ingress.admit(&[], &ring);
        assert!(frames.is_empty());
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn exact_chunk_admits_one_frame() {
        let ring = AudioRingBuffer::new();
        let mut ingress = FrameIngress::new();
        let frames = ingress.admit(&vec![0u8; CHUNK_SIZE], &ring);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pcm.len(), CHUNK_SIZE);
    }

    #[test]
    fn undersized_payload_is_zero_padded() {
        let ring = AudioRingBuffer::new();
        let mut ingress = FrameIngress::new();
        let frames = ingress.admit(&[1, 2, 3], &ring);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].pcm.len(), CHUNK_SIZE);
        assert_eq!(&frames[0].pcm[..3], &[1, 2, 3]);
        assert!(frames[0].pcm[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn oversized_payload_splits_and_drops_tail() {
        let ring = AudioRingBuffer::new();
        let mut ingress = FrameIngress::new();
        let mut payload = vec![0u8; CHUNK_SIZE * 2 + 10];
        payload[CHUNK_SIZE] = 7; // mark start of second frame
        let frames = ingress.admit(&payload, &ring);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].pcm[0], 7);
    }

    #[test]
    fn admitted_frame_ids_are_dense_and_monotonic() {
        let ring = AudioRingBuffer::new();
        let mut ingress = FrameIngress::new();
        let mut payload = vec![0u8; CHUNK_SIZE * 3];
        payload.truncate(CHUNK_SIZE * 3);
        let frames = ingress.admit(&payload, &ring);
        let ids: Vec<u64> = frames.iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
