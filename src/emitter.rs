//! Result Emitter.
//!
//! Thin wrapper around the per-connection outbound channel: formats
//! `TentativeOutput`/`CommittedOutput` messages and drops silently if the
//! writer task has already gone away, rather than making the Coordinator
//! aware of transport state.
//!
//! spec.md §6 fixes `confidence` as a literal per message type (`"tentative"`
//! / `"high"`), not a computed bucket. spec.md §4.5 requires an asymmetric
//! backpressure policy: tentative emissions are best-effort and dropped
//! outright if the outbound channel is full; committed emissions get a
//! bounded window to land before being logged and dropped, so neither path
//! can block the Coordinator indefinitely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::protocol::{now_unix, ServerMessage};

/// Upper bound on how long a committed emission may block the Coordinator
/// before being logged and dropped (spec.md §4.5).
const COMMITTED_SEND_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Emitter {
    tx: mpsc::Sender<ServerMessage>,
    active: Arc<AtomicBool>,
}

impl Emitter {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx, active: Arc::new(AtomicBool::new(true)) }
    }

    /// Marks this emitter inactive; further sends are no-ops. Set once the
    /// writer task observes the socket closing.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Best-effort: dropped outright if the outbound channel is full rather
    /// than blocking the Coordinator (spec.md §4.5).
    pub async fn send_tentative(
        &self,
        current_text: String,
        text: String,
        start_chunk_id: u64,
        end_chunk_id: u64,
        duration: f64,
        processing_delay: f64,
    ) {
        if !self.is_active() {
            return;
        }
        let message = ServerMessage::TentativeOutput {
            current_text,
            text,
            start_chunk_id,
            end_chunk_id,
            duration,
            timestamp: now_unix(),
            confidence: "tentative",
            processing_delay,
        };
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("tentative emission dropped, transport backpressured");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.deactivate();
            }
        }
    }

    /// Best-effort within `COMMITTED_SEND_TIMEOUT`: logged and dropped if
    /// the transport doesn't drain in time, never blocking indefinitely
    /// (spec.md §4.5).
    #[allow(clippy::too_many_arguments)]
    pub async fn send_committed(
        &self,
        text: String,
        segment_id: String,
        start_chunk_id: u64,
        end_chunk_id: u64,
        start_time: f64,
        end_time: f64,
        duration: f64,
        audio_length: usize,
    ) {
        if !self.is_active() {
            return;
        }
        let message = ServerMessage::CommittedOutput {
            text,
            segment_id: segment_id.clone(),
            start_chunk_id,
            end_chunk_id,
            start_time,
            end_time,
            duration,
            timestamp: now_unix(),
            confidence: "high",
            audio_length,
        };
        match timeout(COMMITTED_SEND_TIMEOUT, self.tx.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => self.deactivate(),
            Err(_) => {
                tracing::warn!(%segment_id, "committed emission dropped, transport too slow");
            }
        }
    }

    pub async fn send(&self, message: ServerMessage) {
        if !self.is_active() {
            return;
        }
        if self.tx.send(message).await.is_err() {
            self.deactivate();
        }
    }
}
