//! Synthesis backends.
//!
//! The engine decides *when* text is synthesized; a [`Synthesizer`] decides
//! *how*. Implementations report audio and completion through the
//! [`SynthesisContext`] they are handed.

pub mod client;
pub mod mock;
pub mod tone;

use crate::error::Result;
use crate::lifecycle::assembler::AudioFormat;
use crate::lifecycle::context::SynthesisContext;
use crate::message::{AudioEndReason, TextChunk};
use serde_json::Value;

pub use client::{ClientEvent, ClientSynthesizer, StreamingClient};
pub use mock::MockSynthesizer;
pub use tone::ToneSynthesizer;

/// Trait for text-to-speech backends.
///
/// This trait allows swapping implementations (vendor clients vs mock).
#[async_trait::async_trait]
pub trait Synthesizer: Send + Sync + 'static {
    /// Vendor name used in metrics, errors and dump file names.
    fn vendor(&self) -> &str;

    /// PCM layout of the bytes passed to `send_audio_data`.
    fn audio_format(&self) -> AudioFormat;

    /// Synthesizes one chunk.
    ///
    /// Called only for the active request, one chunk at a time. When the
    /// chunk ends its request (`text_input_end`), the implementation is
    /// expected to send `audio_end` and call `finish_request`. The returned
    /// future is dropped if the request is cancelled.
    async fn request_tts(&self, chunk: TextChunk, ctx: SynthesisContext) -> Result<()>;

    /// Cancellation hook run by flush and shutdown after the active request's
    /// synthesis has been cancelled.
    ///
    /// The default sends an interrupted `audio_end` and completes the request.
    async fn cancel_tts(&self, ctx: SynthesisContext) -> Result<()> {
        ctx.send_audio_end(AudioEndReason::Interrupted);
        ctx.finish_request(AudioEndReason::Interrupted);
        Ok(())
    }

    /// Applies opaque configuration sent with `update_configs`.
    async fn update_configs(&self, _configs: Value) -> Result<()> {
        Ok(())
    }
}
