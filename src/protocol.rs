//! Wire schema for the streaming WebSocket session (spec.md §6).
//!
//! Binary WS frames carry raw PCM and are handled directly by
//! `FrameIngress`; text WS frames carry UTF-8 JSON tagged by `type`,
//! modeled here as two serde-tagged enums.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::{RuntimeConfig, RuntimeConfigUpdate};

/// Client -> server control messages (text WS frames).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    GetState,
    VadConfig { config: RuntimeConfigUpdate },
    Close,
}

/// Server -> client messages (text WS frames).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished {
        client_id: String,
        features: Vec<&'static str>,
        config: RuntimeConfig,
        sample_rate: u32,
        chunk_duration_ms: u64,
    },
    TentativeOutput {
        current_text: String,
        text: String,
        start_chunk_id: u64,
        end_chunk_id: u64,
        duration: f64,
        timestamp: f64,
        confidence: &'static str,
        processing_delay: f64,
    },
    CommittedOutput {
        text: String,
        segment_id: String,
        start_chunk_id: u64,
        end_chunk_id: u64,
        start_time: f64,
        end_time: f64,
        duration: f64,
        timestamp: f64,
        confidence: &'static str,
        audio_length: usize,
    },
    Pong {
        timestamp: f64,
        client_id: String,
    },
    ConnectionState {
        buffer_size: usize,
        active_segment: bool,
        vad_state: bool,
        last_chunk_id: i64,
        sample_rate: u32,
        chunk_duration_ms: u64,
    },
    ConfigUpdated {
        config: RuntimeConfig,
    },
    Error {
        code: &'static str,
        message: String,
        client_id: String,
    },
}

/// One NDJSON line of the batch `/transcribe/file` response (spec.md §6):
/// one `initialization`, one `segments_summary`, one `segment_result` or
/// `segment_error` per sub-segment carrying a running `progress` percentage,
/// and one `final_summary`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchRecord {
    Initialization {
        client_id: String,
        sample_rate: u32,
        total_duration: f64,
        timestamp: f64,
    },
    SegmentsSummary {
        total_segments: usize,
        timestamp: f64,
    },
    SegmentResult {
        segment_id: String,
        index: usize,
        progress: f64,
        text: String,
        start_time: f64,
        end_time: f64,
        duration: f64,
        confidence: &'static str,
        timestamp: f64,
    },
    SegmentError {
        segment_id: String,
        index: usize,
        progress: f64,
        code: &'static str,
        message: String,
        timestamp: f64,
    },
    FinalSummary {
        total_segments: usize,
        successful_segments: usize,
        failed_segments: usize,
        total_duration: f64,
        transcript: String,
        timestamp: f64,
    },
}

/// Current wall-clock time as fractional seconds since the Unix epoch, for
/// `timestamp` fields — these are presentation data, not used for ordering
/// (ordering is derived from frame ids / `Instant`s internally).
pub fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
