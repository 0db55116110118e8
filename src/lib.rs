//! ttsflow - Streaming text-to-speech request lifecycle manager
//!
//! Accepts text chunks tagged with request ids, synthesizes exactly one
//! request at a time, reassembles audio into sample-aligned frames, and
//! supports mid-stream flushes that cancel and reset everything in flight.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod dump;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod message;
pub mod protocol;
pub mod sink;
pub mod synth;
#[cfg(feature = "wav")]
pub mod wav;

// Engine
pub use lifecycle::{
    AudioFormat, AudioFrame, EngineHandle, EngineSnapshot, Producer, RequestState,
    SynthesisContext, TtsEngine,
};

// Core traits (text in → synthesize → events out)
pub use sink::{ChannelSink, CollectorSink, EventSink, JsonLinesSink};
pub use synth::{MockSynthesizer, Synthesizer};

// Messages and protocol
pub use message::{AudioEndReason, FlushRequest, Metadata, TextChunk, TextResult};
pub use protocol::{InboundEvent, OutboundEvent};

// Error handling
pub use error::{Result, TtsError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.3.0+abc1234"` when git hash is available, `"0.3.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
