//! Batch file transcription endpoint.
//!
//! `POST /transcribe/file`: decodes an uploaded audio file with `symphonia`,
//! resamples to 16kHz mono with `rubato` if needed, segments the whole
//! buffer with the VAD Engine's `speech_intervals`, splits any interval
//! longer than `MAX_SEGMENT_DURATION_S` the same way the streaming
//! Coordinator splits an over-long utterance, and transcribes each
//! sub-segment. Streaming mode (the default) emits one `BatchRecord` per
//! NDJSON line via `async-stream`; `?streaming=false` collects the same
//! records into a single JSON response instead (spec.md §6).

use std::collections::HashMap;
use std::io::Cursor;

use async_stream::stream;
use axum::body::Body;
use axum::extract::{Multipart, Query};
use axum::response::{IntoResponse, Response};
use futures_util::{pin_mut, Stream, StreamExt};
use rubato::{FftFixedInOut, Resampler};
use serde::Serialize;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::config::{MAX_SEGMENT_DURATION_S, SAMPLE_RATE, VAD_SPEECH_THRESHOLD};
use crate::engines::{asr_engine, vad_engine};
use crate::error::ServiceError;
use crate::handle::Handle;
use crate::protocol::{now_unix, BatchRecord};
use crate::stt::build_instruction;
use crate::vad::SpeechInterval;

const BATCH_WINDOW_SAMPLES: usize = 1600; // 100ms at 16kHz

/// Decodes `bytes` (an arbitrary container/codec symphonia recognizes) into
/// mono f32 PCM at `SAMPLE_RATE`, resampling if the source rate differs.
fn decode_to_mono_16k(bytes: Vec<u8>) -> Result<Vec<f32>, ServiceError> {
    let cursor = Cursor::new(bytes);
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&Hint::new(), mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| ServiceError::Transport(format!("unrecognized audio container: {e}")))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| ServiceError::Transport("no decodable audio track".to_string()))?
        .clone();

    let source_rate = track.codec_params.sample_rate.unwrap_or(SAMPLE_RATE);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| ServiceError::Transport(format!("unsupported codec: {e}")))?;

    let mut mono: Vec<f32> = Vec::new();
    while let Ok(packet) = format.next_packet() {
        if packet.track_id() != track.id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let spec = *decoded.spec();
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        let samples = buf.samples();
        if channels <= 1 {
            mono.extend_from_slice(samples);
        } else {
            for frame in samples.chunks(channels) {
                let sum: f32 = frame.iter().sum();
                mono.push(sum / channels as f32);
            }
        }
    }

    if source_rate == SAMPLE_RATE {
        return Ok(mono);
    }
    resample(&mono, source_rate, SAMPLE_RATE)
}

fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, ServiceError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let mut resampler =
        FftFixedInOut::<f32>::new(from_rate as usize, to_rate as usize, 1024, 1)
            .map_err(|e| ServiceError::Transport(format!("resampler init failed: {e}")))?;

    let mut out = Vec::new();
    let chunk_size = resampler.input_frames_next();
    let mut cursor = 0;
    while cursor < input.len() {
        let end = (cursor + chunk_size).min(input.len());
        let mut chunk = input[cursor..end].to_vec();
        chunk.resize(chunk_size, 0.0);
        let processed = resampler
            .process(&[chunk], None)
            .map_err(|e| ServiceError::Transport(format!("resample failed: {e}")))?;
        out.extend_from_slice(&processed[0]);
        cursor = end;
    }
    Ok(out)
}

/// Splits `intervals` so that none spans more than `MAX_SEGMENT_DURATION_S`,
/// mirroring `coordinator.rs`'s over-long-utterance split. Returns
/// `(segment_id, interval)` pairs in order; a split interval's parts are
/// suffixed `_part_0`, `_part_1`, ... off one shared handle.
fn split_into_segments(intervals: Vec<SpeechInterval>) -> Vec<(String, SpeechInterval)> {
    let max_samples = MAX_SEGMENT_DURATION_S as usize * SAMPLE_RATE as usize;
    let mut out = Vec::new();

    for interval in intervals {
        let span = interval.end_sample - interval.start_sample;
        if span <= max_samples {
            out.push((Handle::new().to_string(), interval));
            continue;
        }

        let handle = Handle::new().to_string();
        let mut cursor = interval.start_sample;
        let mut part = 0u32;
        while cursor < interval.end_sample {
            let end = (cursor + max_samples).min(interval.end_sample);
            out.push((
                format!("{handle}_part_{part}"),
                SpeechInterval { start_sample: cursor, end_sample: end },
            ));
            cursor = end;
            part += 1;
        }
    }

    out
}

/// Handles a multipart upload under field name `file`, plus an optional
/// `hotwords` text field (comma-separated). `?streaming=false` switches from
/// the default NDJSON stream to one aggregated JSON response.
pub async fn transcribe_file(
    Query(params): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Response {
    let mut audio_bytes: Option<Vec<u8>> = None;
    let mut hotwords: Vec<String> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(err) => {
                return ServiceError::Transport(format!("malformed multipart body: {err}"))
                    .into_response();
            }
        };
        match field.name() {
            Some("file") => match field.bytes().await {
                Ok(bytes) => audio_bytes = Some(bytes.to_vec()),
                Err(err) => {
                    return ServiceError::Transport(format!("failed reading upload: {err}"))
                        .into_response();
                }
            },
            Some("hotwords") => {
                if let Ok(text) = field.text().await {
                    hotwords = text.split(',').map(|s| s.to_string()).collect();
                }
            }
            _ => {}
        }
    }

    let Some(bytes) = audio_bytes else {
        return ServiceError::Transport("missing 'file' field".to_string()).into_response();
    };

    let samples = match decode_to_mono_16k(bytes) {
        Ok(s) => s,
        Err(err) => return err.into_response(),
    };

    let client_id = Handle::new().to_string();
    let hotwords = crate::stt::normalize_hotwords(&hotwords);
    let streaming = !matches!(params.get("streaming").map(String::as_str), Some("false" | "0"));

    if streaming {
        let body = Body::from_stream(ndjson_lines(batch_records(samples, hotwords, client_id)));
        Response::builder()
            .header("content-type", "application/x-ndjson")
            .body(body)
            .unwrap_or_else(|_| {
                ServiceError::Transport("failed to build response".into()).into_response()
            })
    } else {
        let stream = batch_records(samples, hotwords, client_id);
        pin_mut!(stream);
        let records: Vec<BatchRecord> = stream.collect().await;
        axum::Json(AggregateResponse { records }).into_response()
    }
}

#[derive(Serialize)]
struct AggregateResponse {
    records: Vec<BatchRecord>,
}

fn ndjson_lines(
    records: impl Stream<Item = BatchRecord>,
) -> impl Stream<Item = Result<bytes::Bytes, std::io::Error>> {
    stream! {
        pin_mut!(records);
        while let Some(record) = records.next().await {
            if let Ok(mut line) = serde_json::to_string(&record) {
                line.push('\n');
                yield Ok(bytes::Bytes::from(line));
            }
        }
    }
}

/// The full record sequence for one batch upload: initialization,
/// segments_summary, one segment_result/segment_error per sub-segment
/// (carrying `progress`), and final_summary.
fn batch_records(
    samples: Vec<f32>,
    hotwords: Vec<String>,
    client_id: String,
) -> impl Stream<Item = BatchRecord> {
    stream! {
        let total_duration = samples.len() as f64 / SAMPLE_RATE as f64;
        yield BatchRecord::Initialization {
            client_id,
            sample_rate: SAMPLE_RATE,
            total_duration,
            timestamp: now_unix(),
        };

        let vad = vad_engine();
        let asr = asr_engine();
        let instruction = build_instruction(&hotwords);

        let intervals = match vad.speech_intervals(&samples, VAD_SPEECH_THRESHOLD, BATCH_WINDOW_SAMPLES).await {
            Ok(intervals) => intervals,
            Err(err) => {
                tracing::warn!(error = %err, "batch VAD segmentation failed");
                yield BatchRecord::SegmentsSummary { total_segments: 0, timestamp: now_unix() };
                yield BatchRecord::FinalSummary {
                    total_segments: 0,
                    successful_segments: 0,
                    failed_segments: 0,
                    total_duration,
                    transcript: String::new(),
                    timestamp: now_unix(),
                };
                return;
            }
        };

        let segments = split_into_segments(intervals);
        let total_segments = segments.len();
        yield BatchRecord::SegmentsSummary { total_segments, timestamp: now_unix() };

        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut transcript_parts: Vec<String> = Vec::new();

        for (index, (segment_id, interval)) in segments.into_iter().enumerate() {
            let segment = &samples[interval.start_sample..interval.end_sample];
            let duration_s = segment.len() as f64 / SAMPLE_RATE as f64;
            let max_new_tokens = (duration_s * 5.0 + 50.0).clamp(50.0, 200.0) as u32;
            let progress = ((index + 1) as f64 / total_segments.max(1) as f64) * 100.0;

            match asr.transcribe(segment, instruction.as_deref(), max_new_tokens).await {
                Ok(result) => {
                    successful += 1;
                    if !result.text.is_empty() {
                        transcript_parts.push(result.text.clone());
                    }
                    yield BatchRecord::SegmentResult {
                        segment_id,
                        index,
                        progress,
                        text: result.text,
                        start_time: interval.start_sample as f64 / SAMPLE_RATE as f64,
                        end_time: interval.end_sample as f64 / SAMPLE_RATE as f64,
                        duration: duration_s,
                        confidence: if result.confidence >= 0.85 { "high" } else if result.confidence >= 0.6 { "medium" } else { "low" },
                        timestamp: now_unix(),
                    };
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!(error = %err, segment = %segment_id, "batch segment transcription failed");
                    yield BatchRecord::SegmentError {
                        segment_id,
                        index,
                        progress,
                        code: "asr_engine_error",
                        message: err.to_string(),
                        timestamp: now_unix(),
                    };
                }
            }
        }

        yield BatchRecord::FinalSummary {
            total_segments,
            successful_segments: successful,
            failed_segments: failed,
            total_duration,
            transcript: transcript_parts.join(" "),
            timestamp: now_unix(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity_passthrough_is_unaffected() {
        let input = vec![0.1f32; 100];
        let out = resample(&input, SAMPLE_RATE, SAMPLE_RATE);
        // resample() is only invoked when rates differ; function itself
        // still behaves sanely when rates happen to match.
        assert!(out.is_ok());
    }

    #[test]
    fn empty_input_resamples_to_empty() {
        let out = resample(&[], 44_100, SAMPLE_RATE).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn short_interval_is_not_split() {
        let interval = SpeechInterval { start_sample: 0, end_sample: SAMPLE_RATE as usize * 5 };
        let segments = split_into_segments(vec![interval]);
        assert_eq!(segments.len(), 1);
        assert!(!segments[0].0.contains("_part_"));
    }

    #[test]
    fn long_interval_splits_into_max_duration_chunks() {
        let total_samples = SAMPLE_RATE as usize * 75; // 75s
        let interval = SpeechInterval { start_sample: 0, end_sample: total_samples };
        let segments = split_into_segments(vec![interval]);
        assert_eq!(segments.len(), 3);
        assert!(segments[0].0.ends_with("_part_0"));
        assert!(segments[2].0.ends_with("_part_2"));
        let total: usize =
            segments.iter().map(|(_, iv)| iv.end_sample - iv.start_sample).sum();
        assert_eq!(total, total_samples);
    }
}
