//! Per-connection orchestration.
//!
//! Wires one WebSocket into the four concurrent tasks spec.md §5 describes:
//! a main loop reading frames/control messages, a VAD Controller ticker, a
//! Transcription Coordinator, and a writer draining outbound messages back
//! to the socket. All four share one `CancellationToken`; any of them
//! finishing (error, disconnect, idle timeout) cancels the rest. Mirrors
//! the teacher's `call_server.rs` task-per-concern shape around one call,
//! generalized from its fixed input/output adapter pair to this service's
//! frame/control-message split.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::{
    Config, RuntimeConfig, CHUNK_DURATION_MS, IDLE_TIMEOUT_SECS, READ_TIMEOUT_SECS, SAMPLE_RATE,
};
use crate::coordinator::Coordinator;
use crate::debug_audio::DebugAudioWriter;
use crate::emitter::Emitter;
use crate::engines::{asr_engine, vad_engine};
use crate::event::VadEvent;
use crate::handle::Handle;
use crate::http::AppState;
use crate::ingress::FrameIngress;
use crate::protocol::{now_unix, ClientMessage, ServerMessage};
use crate::ring::AudioRingBuffer;
use crate::stt::normalize_hotwords;
use crate::vad_controller::{VadController, VadSnapshot};

/// Axum handler for `GET /stream`. Hotwords may be supplied as a
/// comma-separated `?hotwords=` query parameter, mirroring the `hotwords`
/// multipart field the batch endpoint accepts (spec.md §4.4 treats hotwords
/// as an input to "any ASR call", streaming included).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let hotwords: Vec<String> = params
        .get("hotwords")
        .map(|raw| raw.split(',').map(|s| s.to_string()).collect())
        .unwrap_or_default();
    let default_runtime = state.runtime.read().clone();

    ws.on_upgrade(move |socket| handle_connection(socket, state.config, default_runtime, hotwords))
}

/// Drives one WebSocket connection end to end. Returns once the socket
/// closes or the connection is torn down. `default_runtime` seeds this
/// connection's own copy of `RuntimeConfig` — later changes through
/// `POST /vad/config` only affect connections made afterward.
pub async fn handle_connection(
    socket: WebSocket,
    config: Arc<Config>,
    default_runtime: RuntimeConfig,
    hotwords: Vec<String>,
) {
    let connection_id = Handle::new();
    let (mut ws_tx, mut ws_rx) = socket.split();

    let ring = Arc::new(AudioRingBuffer::new());
    let runtime = Arc::new(RwLock::new(default_runtime));
    let snapshot = Arc::new(RwLock::new(VadSnapshot::default()));
    let cancel = CancellationToken::new();

    let (event_tx, event_rx) = mpsc::channel::<VadEvent>(64);
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);
    let emitter = Arc::new(Emitter::new(out_tx));

    let hotwords = normalize_hotwords(&hotwords);
    let debug_audio = Arc::new(DebugAudioWriter::new(
        config.debug_audio_enabled,
        &config.debug_audio_base_dir,
        &connection_id.to_string(),
    ));

    emitter
        .send(ServerMessage::ConnectionEstablished {
            client_id: connection_id.to_string(),
            features: vec!["tentative", "committed", "vad_config"],
            config: runtime.read().clone(),
            sample_rate: SAMPLE_RATE,
            chunk_duration_ms: CHUNK_DURATION_MS,
        })
        .await;

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                msg = out_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let Ok(json) = serde_json::to_string(&msg) else { continue };
                    if ws_tx.send(Message::Text(json)).await.is_err() {
                        writer_cancel.cancel();
                        break;
                    }
                }
            }
        }
    });

    let vad_cancel = cancel.clone();
    let vad_ring = ring.clone();
    let vad_runtime = runtime.clone();
    let vad_snapshot = snapshot.clone();
    let vad_task = tokio::spawn(async move {
        let mut controller =
            VadController::new(vad_engine(), vad_ring, vad_runtime, event_tx, vad_snapshot);
        let mut ticker = tokio::time::interval(Duration::from_millis(CHUNK_DURATION_MS));
        loop {
            tokio::select! {
                _ = vad_cancel.cancelled() => break,
                _ = ticker.tick() => controller.tick().await,
            }
        }
    });

    let coordinator_cancel = cancel.clone();
    let coordinator = Coordinator::new(
        ring.clone(),
        asr_engine(),
        emitter.clone(),
        debug_audio,
        hotwords,
        event_rx,
    );
    let coordinator_task = tokio::spawn(coordinator.run(coordinator_cancel));

    let mut ingress = FrameIngress::new();
    loop {
        // Each receive is bounded at READ_TIMEOUT_SECS (spec.md §5 "transport
        // read: 5s per receive"), but a timeout here only closes the
        // connection once the separate IDLE_TIMEOUT_SECS aggregate has
        // actually elapsed since the last observed activity -- a single slow
        // read shouldn't tear down an otherwise-live connection.
        let message = match timeout(Duration::from_secs(READ_TIMEOUT_SECS), ws_rx.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(err))) => {
                tracing::debug!(error = %err, %connection_id, "websocket read error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                if ingress.last_activity().elapsed() >= Duration::from_secs(IDLE_TIMEOUT_SECS) {
                    tracing::info!(%connection_id, "connection idle timeout, closing");
                    break;
                }
                continue;
            }
        };

        match message {
            Message::Binary(payload) => {
                ingress.admit(&payload, &ring);
            }
            Message::Text(text) => {
                ingress.touch();
                let should_close = handle_control_message(
                    &text,
                    &connection_id,
                    &ring,
                    &runtime,
                    &snapshot,
                    &emitter,
                )
                .await;
                if should_close {
                    tracing::debug!(%connection_id, "client sent close, terminating session");
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {
                ingress.touch();
            }
        }
    }

    cancel.cancel();
    let _ = vad_task.await;
    let _ = coordinator_task.await;
    let _ = writer.await;
    tracing::info!(%connection_id, "connection closed");
}

/// Dispatches one parsed control message, returning `true` if the session
/// should terminate (the `close` message per spec.md §6).
async fn handle_control_message(
    text: &str,
    connection_id: &Handle,
    ring: &Arc<AudioRingBuffer>,
    runtime: &Arc<RwLock<RuntimeConfig>>,
    snapshot: &Arc<RwLock<VadSnapshot>>,
    emitter: &Arc<Emitter>,
) -> bool {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let Ok(msg) = parsed else {
        emitter
            .send(ServerMessage::Error {
                code: "bad_request",
                message: "could not parse control message".to_string(),
                client_id: connection_id.to_string(),
            })
            .await;
        return false;
    };

    match msg {
        ClientMessage::Ping => {
            emitter
                .send(ServerMessage::Pong { timestamp: now_unix(), client_id: connection_id.to_string() })
                .await;
        }
        ClientMessage::GetState => {
            let snap = *snapshot.read();
            emitter
                .send(ServerMessage::ConnectionState {
                    buffer_size: ring.len(),
                    active_segment: ring.open_utterance().is_some(),
                    vad_state: snap.speaking,
                    last_chunk_id: ring.last_frame_id().map(|id| id as i64).unwrap_or(-1),
                    sample_rate: SAMPLE_RATE,
                    chunk_duration_ms: CHUNK_DURATION_MS,
                })
                .await;
        }
        ClientMessage::VadConfig { config: update } => {
            let mut cfg = runtime.write();
            match cfg.apply_update(update) {
                Ok(()) => {
                    let new_cfg = cfg.clone();
                    drop(cfg);
                    emitter.send(ServerMessage::ConfigUpdated { config: new_cfg }).await;
                }
                Err(err) => {
                    drop(cfg);
                    emitter
                        .send(ServerMessage::Error {
                            code: "config_error",
                            message: err.to_string(),
                            client_id: connection_id.to_string(),
                        })
                        .await;
                }
            }
        }
        ClientMessage::Close => return true,
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerMessage;

    fn setup() -> (
        Handle,
        Arc<AudioRingBuffer>,
        Arc<RwLock<RuntimeConfig>>,
        Arc<RwLock<VadSnapshot>>,
        Arc<Emitter>,
        mpsc::Receiver<ServerMessage>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        (
            Handle::new(),
            Arc::new(AudioRingBuffer::new()),
            Arc::new(RwLock::new(RuntimeConfig::default())),
            Arc::new(RwLock::new(VadSnapshot::default())),
            Arc::new(Emitter::new(tx)),
            rx,
        )
    }

    #[tokio::test]
    async fn close_message_signals_termination() {
        let (id, ring, runtime, snapshot, emitter, _rx) = setup();
        let should_close =
            handle_control_message(r#"{"type":"close"}"#, &id, &ring, &runtime, &snapshot, &emitter)
                .await;
        assert!(should_close);
    }

    #[tokio::test]
    async fn ping_does_not_close_and_replies_pong() {
        let (id, ring, runtime, snapshot, emitter, mut rx) = setup();
        let should_close =
            handle_control_message(r#"{"type":"ping"}"#, &id, &ring, &runtime, &snapshot, &emitter)
                .await;
        assert!(!should_close);
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Pong { .. }));
    }

    #[tokio::test]
    async fn malformed_control_message_replies_error_without_closing() {
        let (id, ring, runtime, snapshot, emitter, mut rx) = setup();
        let should_close =
            handle_control_message("not json", &id, &ring, &runtime, &snapshot, &emitter).await;
        assert!(!should_close);
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn invalid_vad_config_update_is_rejected_with_error() {
        let (id, ring, runtime, snapshot, emitter, mut rx) = setup();
        let before = runtime.read().clone();
        let should_close = handle_control_message(
            r#"{"type":"vad_config","config":{"speech_threshold":5.0}}"#,
            &id,
            &ring,
            &runtime,
            &snapshot,
            &emitter,
        )
        .await;
        assert!(!should_close);
        let msg = rx.recv().await.unwrap();
        assert!(matches!(msg, ServerMessage::Error { .. }));
        assert_eq!(runtime.read().speech_threshold, before.speech_threshold);
    }
}
