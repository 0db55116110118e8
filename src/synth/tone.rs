//! Built-in synthesizer rendering a sine tone paced like a streaming vendor.
//!
//! Each character becomes `ms_per_char` of audio, delivered in pieces of
//! `chunk_delay_ms` with a matching pause between pieces. Used by the demo
//! binary and for exercising the engine without a vendor account.

use crate::config::SynthConfig;
use crate::error::{Result, TtsError};
use crate::lifecycle::assembler::AudioFormat;
use crate::lifecycle::context::SynthesisContext;
use crate::message::{AudioEndReason, TextChunk, TextResult, TtsWord};
use crate::synth::Synthesizer;
use serde_json::Value;
use std::f64::consts::TAU;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct ToneSynthesizer {
    format: AudioFormat,
    settings: Mutex<SynthConfig>,
}

impl ToneSynthesizer {
    pub fn new(format: AudioFormat, settings: SynthConfig) -> Self {
        Self {
            format,
            settings: Mutex::new(settings),
        }
    }

    fn settings(&self) -> SynthConfig {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Renders `duration_ms` of a sine tone as little-endian signed PCM of
/// `format.bytes_per_sample` bytes (clamped to 1..=4), duplicated across
/// channels.
pub fn render_tone(format: AudioFormat, tone_hz: f32, duration_ms: u64) -> Vec<u8> {
    let samples = format.sample_rate as u64 * duration_ms / 1000;
    let channels = format.channels.max(1) as usize;
    let width = (format.bytes_per_sample as usize).clamp(1, 4);
    let peak = ((1i64 << (width * 8 - 1)) - 1) as f64;
    let mut pcm = Vec::with_capacity(samples as usize * channels * width);
    for n in 0..samples {
        let t = n as f64 / format.sample_rate as f64;
        let value = ((TAU * tone_hz as f64 * t).sin() * peak * 0.3) as i32;
        let bytes = value.to_le_bytes();
        for _ in 0..channels {
            pcm.extend_from_slice(&bytes[..width]);
        }
    }
    pcm
}

/// Splits `text` into words with timings proportional to their length.
pub fn word_timings(text: &str, start_ms: u64, ms_per_char: u32) -> Vec<TtsWord> {
    let mut cursor = start_ms;
    text.split_whitespace()
        .map(|word| {
            let duration_ms = word.chars().count() as u64 * ms_per_char as u64;
            let timed = TtsWord {
                word: word.to_string(),
                start_ms: cursor,
                duration_ms,
            };
            cursor += duration_ms + ms_per_char as u64;
            timed
        })
        .collect()
}

#[async_trait::async_trait]
impl Synthesizer for ToneSynthesizer {
    fn vendor(&self) -> &str {
        "tone"
    }

    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    async fn request_tts(&self, chunk: TextChunk, ctx: SynthesisContext) -> Result<()> {
        let settings = self.settings();
        let start_ms = ctx.audio_duration_ms();
        let duration_ms = chunk.char_count() * settings.ms_per_char as u64;
        let pcm = render_tone(self.format, settings.tone_hz, duration_ms);

        if !pcm.is_empty() {
            ctx.send_audio_start();
        }

        let delay = Duration::from_millis(settings.chunk_delay_ms);
        let piece_bytes = (self.format.sample_rate as u64 * settings.chunk_delay_ms.max(1) / 1000)
            as usize
            * self.format.frame_width();
        for piece in pcm.chunks(piece_bytes.max(1)) {
            if ctx.is_cancelled() {
                return Ok(());
            }
            ctx.send_audio_data(piece);
            tokio::time::sleep(delay).await;
        }

        ctx.send_text_result(TextResult {
            request_id: chunk.request_id.clone(),
            text: chunk.text.clone(),
            start_ms,
            duration_ms,
            words: Some(word_timings(&chunk.text, start_ms, settings.ms_per_char)),
            text_result_end: chunk.text_input_end,
            metadata: Default::default(),
        });

        if chunk.text_input_end {
            ctx.send_audio_end(AudioEndReason::RequestEnd);
            ctx.finish_request(AudioEndReason::RequestEnd);
        }
        Ok(())
    }

    /// Accepts `tone_hz`, `ms_per_char` and `chunk_delay_ms`.
    async fn update_configs(&self, configs: Value) -> Result<()> {
        let Value::Object(map) = configs else {
            return Err(TtsError::ConfigUpdate {
                message: "expected an object".to_string(),
            });
        };

        let mut next = self.settings();
        for (key, value) in &map {
            match key.as_str() {
                "tone_hz" => {
                    next.tone_hz = value
                        .as_f64()
                        .filter(|hz| *hz > 0.0)
                        .ok_or_else(|| bad_value(key))? as f32
                }
                "ms_per_char" => {
                    next.ms_per_char = value
                        .as_u64()
                        .and_then(|ms| u32::try_from(ms).ok())
                        .ok_or_else(|| bad_value(key))?
                }
                "chunk_delay_ms" => {
                    next.chunk_delay_ms = value.as_u64().ok_or_else(|| bad_value(key))?
                }
                other => {
                    return Err(TtsError::ConfigUpdate {
                        message: format!("unknown setting {}", other),
                    });
                }
            }
        }

        tracing::info!(tone_hz = next.tone_hz, ms_per_char = next.ms_per_char, "Tone settings updated");
        *self.settings.lock().unwrap_or_else(PoisonError::into_inner) = next;
        Ok(())
    }
}

fn bad_value(key: &str) -> TtsError {
    TtsError::ConfigUpdate {
        message: format!("invalid value for {}", key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tone_length_matches_duration() {
        let format = AudioFormat::new(16000, 2, 1);
        let pcm = render_tone(format, 440.0, 250);
        assert_eq!(pcm.len(), 4000 * 2);
        assert_eq!(format.duration_ms(pcm.len() as u64), 250);
    }

    #[test]
    fn tone_is_rendered_at_the_configured_width() {
        let format = AudioFormat::new(16000, 4, 1);
        let pcm = render_tone(format, 440.0, 10);
        assert_eq!(pcm.len(), 160 * 4);
        assert_eq!(format.duration_ms(pcm.len() as u64), 10);

        let samples: Vec<i32> = pcm
            .chunks(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        assert!(peak > i16::MAX as u32, "32-bit samples should exceed the 16-bit range");

        let packed = render_tone(AudioFormat::new(16000, 3, 2), 440.0, 10);
        assert_eq!(packed.len(), 160 * 3 * 2);
    }

    #[test]
    fn stereo_tone_duplicates_channels() {
        let pcm = render_tone(AudioFormat::new(8000, 2, 2), 440.0, 10);
        assert_eq!(pcm.len(), 80 * 4);
        for frame in pcm.chunks(4) {
            assert_eq!(frame[0..2], frame[2..4]);
        }
    }

    #[test]
    fn word_timings_advance_cursor() {
        let words = word_timings("hi there", 100, 10);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].start_ms, 100);
        assert_eq!(words[0].duration_ms, 20);
        assert_eq!(words[1].start_ms, 130);
        assert_eq!(words[1].duration_ms, 50);
    }

    #[tokio::test]
    async fn update_configs_validates_values() {
        let synth = ToneSynthesizer::new(AudioFormat::default(), SynthConfig::default());

        synth
            .update_configs(json!({"tone_hz": 220.0, "ms_per_char": 10}))
            .await
            .unwrap();
        assert_eq!(synth.settings().tone_hz, 220.0);
        assert_eq!(synth.settings().ms_per_char, 10);

        assert!(synth.update_configs(json!({"tone_hz": -1})).await.is_err());
        assert!(synth.update_configs(json!({"pitch": 3})).await.is_err());
        assert!(synth.update_configs(json!("loud")).await.is_err());
        // rejected updates leave settings untouched
        assert_eq!(synth.settings().tone_hz, 220.0);
    }
}
