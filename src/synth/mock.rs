//! Scriptable synthesizer for tests.

use crate::clock::MockClock;
use crate::error::{Result, TtsError};
use crate::lifecycle::assembler::AudioFormat;
use crate::lifecycle::context::SynthesisContext;
use crate::message::{AudioEndReason, TextChunk, TextResult};
use crate::synth::Synthesizer;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Mock synthesizer producing each chunk's UTF-8 bytes as "audio".
///
/// The audio for a chunk is its text repeated `repeat` times, streamed in
/// pieces of `piece_size` bytes, so tests can tell exactly which bytes
/// belong to which chunk.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    vendor: String,
    format: AudioFormat,
    piece_size: usize,
    repeat: usize,
    chunk_delay: Duration,
    fail_on: Option<String>,
    hang_on: Option<String>,
    reject_configs: bool,
    clock_advance: Option<(MockClock, Duration)>,
    calls: Arc<Mutex<Vec<TextChunk>>>,
    cancels: Arc<AtomicUsize>,
    configs: Arc<Mutex<Vec<Value>>>,
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSynthesizer {
    /// Create a new mock synthesizer with default settings
    pub fn new() -> Self {
        Self {
            vendor: "mock".to_string(),
            format: AudioFormat::default(),
            piece_size: 4,
            repeat: 2,
            chunk_delay: Duration::ZERO,
            fail_on: None,
            hang_on: None,
            reject_configs: false,
            clock_advance: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            cancels: Arc::new(AtomicUsize::new(0)),
            configs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_vendor(mut self, vendor: &str) -> Self {
        self.vendor = vendor.to_string();
        self
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    /// Size of each audio piece; odd sizes exercise the assembler carry.
    pub fn with_piece_size(mut self, size: usize) -> Self {
        self.piece_size = size.max(1);
        self
    }

    pub fn with_repeat(mut self, repeat: usize) -> Self {
        self.repeat = repeat;
        self
    }

    /// Pause before each audio piece.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Fail synthesis of any chunk with exactly this text.
    pub fn with_failure_on(mut self, text: &str) -> Self {
        self.fail_on = Some(text.to_string());
        self
    }

    /// After streaming its audio, a chunk with this text waits until cancelled.
    pub fn with_hang_on(mut self, text: &str) -> Self {
        self.hang_on = Some(text.to_string());
        self
    }

    /// Reject every `update_configs` call.
    pub fn with_config_rejection(mut self) -> Self {
        self.reject_configs = true;
        self
    }

    /// Advance `clock` by `by` before the first audio piece of each chunk.
    pub fn with_clock_advance(mut self, clock: MockClock, by: Duration) -> Self {
        self.clock_advance = Some((clock, by));
        self
    }

    /// The bytes produced for `text`.
    pub fn audio_for(&self, text: &str) -> Vec<u8> {
        text.as_bytes().repeat(self.repeat)
    }

    /// Chunks handed to `request_tts`, in call order.
    pub fn calls(&self) -> Vec<TextChunk> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn applied_configs(&self) -> Vec<Value> {
        self.configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait::async_trait]
impl Synthesizer for MockSynthesizer {
    fn vendor(&self) -> &str {
        &self.vendor
    }

    fn audio_format(&self) -> AudioFormat {
        self.format
    }

    async fn request_tts(&self, chunk: TextChunk, ctx: SynthesisContext) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chunk.clone());

        if self.fail_on.as_deref() == Some(chunk.text.as_str()) {
            return Err(TtsError::synthesis(format!(
                "mock synthesis failure on {:?}",
                chunk.text
            )));
        }
        if let Some((clock, by)) = &self.clock_advance {
            clock.advance(*by);
        }

        let start_ms = ctx.audio_duration_ms();
        for piece in self.audio_for(&chunk.text).chunks(self.piece_size) {
            if self.chunk_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.chunk_delay).await;
            }
            ctx.send_audio_data(piece);
        }

        if self.hang_on.as_deref() == Some(chunk.text.as_str()) {
            ctx.cancelled().await;
            return Ok(());
        }

        ctx.send_text_result(TextResult {
            request_id: chunk.request_id.clone(),
            text: chunk.text.clone(),
            start_ms,
            duration_ms: ctx.audio_duration_ms().saturating_sub(start_ms),
            words: None,
            text_result_end: chunk.text_input_end,
            metadata: Default::default(),
        });

        if chunk.text_input_end {
            ctx.send_audio_end(AudioEndReason::RequestEnd);
            ctx.finish_request(AudioEndReason::RequestEnd);
        }
        Ok(())
    }

    async fn cancel_tts(&self, ctx: SynthesisContext) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        ctx.send_audio_end(AudioEndReason::Interrupted);
        ctx.finish_request(AudioEndReason::Interrupted);
        Ok(())
    }

    async fn update_configs(&self, configs: Value) -> Result<()> {
        if self.reject_configs {
            return Err(TtsError::ConfigUpdate {
                message: "mock rejects configuration".to_string(),
            });
        }
        self.configs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(configs);
        Ok(())
    }
}
