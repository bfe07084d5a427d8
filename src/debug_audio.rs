//! Debug audio capture.
//!
//! Reinstates `original_source/backend/debug.py`'s `DebugAudioManager`,
//! dropped by the distilled spec: writes each finalized utterance's
//! committed PCM to a WAV file under `Config::debug_audio_base_dir`, named
//! `{connection_id}_{utterance_start_frame_id}.wav`, for offline inspection
//! of what the Coordinator actually sent to the ASR Engine. Gated on
//! `Config::debug_audio_enabled` — a disabled writer performs no I/O.

use std::path::PathBuf;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::config::SAMPLE_RATE;

pub struct DebugAudioWriter {
    enabled: bool,
    base_dir: PathBuf,
    connection_id: String,
}

impl DebugAudioWriter {
    pub fn new(enabled: bool, base_dir: &str, connection_id: &str) -> Self {
        Self { enabled, base_dir: PathBuf::from(base_dir), connection_id: connection_id.to_string() }
    }

    /// Writes `pcm` (raw little-endian i16 samples) for the utterance that
    /// started at `start_frame_id`. Logs and swallows I/O errors — a failed
    /// debug write must never interrupt the transcription path.
    pub fn write_utterance(&self, start_frame_id: u64, pcm: &[u8]) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.try_write(start_frame_id, pcm) {
            tracing::warn!(start_frame_id, error = %err, "failed to write debug audio utterance");
        }
    }

    fn try_write(&self, start_frame_id: u64, pcm: &[u8]) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        let path = self.base_dir.join(format!("{}_{start_frame_id}.wav", self.connection_id));
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        for chunk in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(())
    }
}
