//! WAV recording of outbound audio frames.

use crate::error::{Result, TtsError};
use crate::lifecycle::assembler::AudioFormat;
use crate::protocol::OutboundEvent;
use crate::sink::EventSink;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

type Writer = hound::WavWriter<BufWriter<File>>;

/// Sink appending every `audio_frame` to one 16-bit PCM WAV file.
///
/// Other events are ignored. Call [`finalize`](Self::finalize) to write the
/// header sizes; an unfinalized file is still readable by most players.
pub struct WavSink {
    writer: Mutex<Option<Writer>>,
}

impl WavSink {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Self> {
        if format.bytes_per_sample != 2 {
            return Err(TtsError::AudioOutput {
                message: format!(
                    "WAV output supports 16-bit samples only, got {} bytes per sample",
                    format.bytes_per_sample
                ),
            });
        }
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(|e| TtsError::AudioOutput {
            message: format!("Failed to create {}: {}", path.display(), e),
        })?;
        Ok(Self {
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn finalize(&self) -> Result<()> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match writer {
            Some(writer) => writer.finalize().map_err(|e| TtsError::AudioOutput {
                message: format!("Failed to finalize WAV: {}", e),
            }),
            None => Ok(()),
        }
    }
}

impl EventSink for WavSink {
    fn emit(&self, event: OutboundEvent) {
        let OutboundEvent::AudioFrame { pcm, .. } = event else {
            return;
        };
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_mut() else {
            return;
        };
        for sample in pcm.chunks_exact(2) {
            if let Err(e) = writer.write_sample(i16::from_le_bytes([sample[0], sample[1]])) {
                tracing::warn!("WAV write failed, recording stopped: {}", e);
                *guard = None;
                return;
            }
        }
    }

    fn name(&self) -> &'static str {
        "wav"
    }
}
