//! Real-time speech-to-text streaming service.
//!
//! Clients open a WebSocket session, push 16kHz/16-bit/mono PCM frames, and
//! receive a two-tier stream of results: low-latency tentative partials that
//! evolve as speech continues, and committed finals emitted when an
//! utterance ends. A batch HTTP endpoint accepts whole audio files and
//! streams per-utterance transcripts as NDJSON, reusing the same VAD
//! segmentation and ASR contracts.
//!
//! # Per-connection pipeline
//!
//! ```text
//! Frame Ingress -> Ring Buffer -> VAD Controller -> Transcription Coordinator -> Result Emitter
//!                                       |                        |
//!                                  VAD Engine               ASR Engine
//!                                (singleton)               (singleton)
//! ```
//!
//! Each connection owns one [`ring::AudioRingBuffer`], one
//! [`vad_controller::VadController`], one [`coordinator::Coordinator`] and
//! one [`emitter::Emitter`], wired together by [`connection::handle_connection`].
//! The VAD Engine and ASR Engine are process-wide singletons (`engines.rs`),
//! shared read-only across every connection.

pub mod batch;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod debug_audio;
pub mod emitter;
pub mod engines;
pub mod error;
pub mod event;
pub mod frame;
pub mod handle;
pub mod http;
pub mod ingress;
pub mod protocol;
pub mod ring;
pub mod stt;
pub mod vad;
pub mod vad_controller;

pub use config::Config;
pub use error::ServiceError;
pub use frame::{Frame, Utterance};
pub use handle::Handle;
pub use http::{build_router, AppState};
pub use ring::AudioRingBuffer;
pub use stt::{SpeechToText, SttError, TranscriptResult};
pub use vad::{SpeechInterval, VadError, VoiceActivityDetection};
