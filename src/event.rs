//! VAD Controller -> Transcription Coordinator events.
//!
//! Published on a `tokio::sync::mpsc` channel, one per connection; the
//! Coordinator is the sole consumer, driving the tentative/committed
//! transcription paths off these plus its own 1 Hz timer.

use crate::frame::Utterance;

#[derive(Debug, Clone)]
pub enum VadEvent {
    /// A new utterance opened at `start_frame_id`.
    UtteranceStarted { start_frame_id: u64 },

    /// The open utterance is still confirmed speech this window (threshold
    /// ramping up). Carries the current hysteresis speech count.
    UtteranceExtended { speech_count: u32 },

    /// The open utterance finalized. Carries the finalized record.
    UtteranceEnded { utterance: Utterance },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn utterance_ended_carries_finalized_record() {
        let utterance = Utterance::open(0, Instant::now());
        let event = VadEvent::UtteranceEnded { utterance: utterance.clone() };
        match event {
            VadEvent::UtteranceEnded { utterance: u } => assert_eq!(u.start_frame_id, 0),
            _ => panic!("wrong variant"),
        }
    }
}
