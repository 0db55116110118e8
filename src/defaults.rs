//! Default configuration constants for ttsflow.
//!
//! Shared by the configuration types, the engine, and the demo synthesizer so
//! every layer agrees on the same fallbacks.

/// Default synthesized audio sample rate in Hz.
///
/// Most streaming TTS vendors deliver 16kHz PCM for voice agents.
pub const SAMPLE_RATE: u32 = 16000;

/// Default sample width in bytes (16-bit PCM).
pub const BYTES_PER_SAMPLE: u16 = 2;

/// Default channel count (mono).
pub const CHANNELS: u16 = 1;

/// How long a completed request's state stays queryable before it is purged.
///
/// Purging happens lazily when the next request becomes active; a flush always
/// clears everything regardless of age.
pub const COMPLETED_RETENTION_MS: u64 = 5000;

/// Interval between periodic usage metrics reports, in milliseconds.
///
/// 0 disables the reporter task.
pub const METRICS_INTERVAL_MS: u64 = 5000;

/// Buffer size for the bounded outbound event channel used by `ChannelSink`.
pub const EVENT_BUFFER: usize = 1024;

/// Default directory for PCM dumps.
pub const DUMP_PATH: &str = "/tmp";

/// PCM dump writer buffer size before bytes are written to disk.
pub const DUMP_BUFFER_BYTES: usize = 64 * 1024;

/// Module name reported in `error` and `metrics` events.
pub const MODULE_NAME: &str = "tts";

/// Delay between audio pieces produced by the demo synthesizer, in milliseconds.
pub const SYNTH_CHUNK_DELAY_MS: u64 = 20;

/// Milliseconds of audio the demo synthesizer produces per input character.
pub const SYNTH_MS_PER_CHAR: u32 = 60;

/// Tone frequency of the demo synthesizer in Hz.
pub const SYNTH_TONE_HZ: f32 = 440.0;

/// Metadata key carrying the conversation session identifier.
pub const METADATA_SESSION_ID: &str = "session_id";

/// Metadata key carrying the conversation turn identifier.
pub const METADATA_TURN_ID: &str = "turn_id";

/// How long the demo runner waits for in-flight requests after input ends.
pub const DRAIN_TIMEOUT_SECS: u64 = 30;
