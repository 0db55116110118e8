//! Reassembles arbitrary synthesized byte chunks into sample-aligned frames.

use serde::{Deserialize, Serialize};

/// PCM layout of synthesized audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, bytes_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bytes_per_sample,
            channels,
        }
    }

    /// Bytes per sample across all channels. Never zero.
    pub fn frame_width(&self) -> usize {
        (self.bytes_per_sample as usize * self.channels as usize).max(1)
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_ms(&self, bytes: u64) -> u64 {
        let bytes_per_second = self.sample_rate as u64 * self.frame_width() as u64;
        if bytes_per_second == 0 {
            return 0;
        }
        bytes * 1000 / bytes_per_second
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(
            crate::defaults::SAMPLE_RATE,
            crate::defaults::BYTES_PER_SAMPLE,
            crate::defaults::CHANNELS,
        )
    }
}

/// A run of whole samples ready to be sent downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub format: AudioFormat,
    pub pcm: Vec<u8>,
    /// Milliseconds since the request's first audio bytes.
    pub timestamp: u64,
}

impl AudioFrame {
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / self.format.frame_width()
    }
}

/// Holds the sub-sample tail between `assemble` calls.
#[derive(Debug)]
pub struct FrameAssembler {
    format: AudioFormat,
    carry: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            carry: Vec::new(),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Appends `bytes` to the carry and returns the aligned prefix, if any.
    ///
    /// The remainder below one frame width is kept for the next call and is
    /// never emitted on its own.
    pub fn assemble(&mut self, bytes: &[u8], timestamp: u64) -> Option<AudioFrame> {
        let width = self.format.frame_width();

        let mut data = std::mem::take(&mut self.carry);
        data.extend_from_slice(bytes);

        let aligned = data.len() - data.len() % width;
        if aligned == 0 {
            self.carry = data;
            return None;
        }
        self.carry = data.split_off(aligned);

        Some(AudioFrame {
            format: self.format,
            pcm: data,
            timestamp,
        })
    }

    /// Discards the pending tail. Called on cancellation.
    pub fn clear_carry(&mut self) {
        if !self.carry.is_empty() {
            tracing::debug!(bytes = self.carry.len(), "Discarding audio carry");
        }
        self.carry.clear();
    }

    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }
}
