//! Data carried through the engine: inbound chunks and flushes, outbound
//! text results, errors, and metrics payloads.

use crate::defaults;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Free-form key/value data attached to requests and events.
pub type Metadata = serde_json::Map<String, Value>;

/// One piece of text for a logical synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub request_id: String,
    pub text: String,
    /// Marks the last chunk of the request.
    #[serde(default)]
    pub text_input_end: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TextChunk {
    pub fn new(request_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            text: text.into(),
            text_input_end: false,
            metadata: Metadata::new(),
        }
    }

    /// Marks this chunk as the end of its request.
    pub fn end(mut self) -> Self {
        self.text_input_end = true;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Character count, as used for usage metrics.
    pub fn char_count(&self) -> u64 {
        self.text.chars().count() as u64
    }
}

/// Request to cancel in-flight work and reset the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushRequest {
    pub flush_id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl FlushRequest {
    pub fn new(flush_id: impl Into<String>) -> Self {
        Self {
            flush_id: flush_id.into(),
            metadata: Metadata::new(),
        }
    }
}

/// Word-level timing inside a text result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsWord {
    pub word: String,
    pub start_ms: u64,
    pub duration_ms: u64,
}

/// Text aligned with the audio produced for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResult {
    pub request_id: String,
    pub text: String,
    pub start_ms: u64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<TtsWord>>,
    pub text_result_end: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Why a request's audio stream ended.
///
/// Serialized as the integers 1, 2 and 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum AudioEndReason {
    RequestEnd = 1,
    Interrupted = 2,
    Error = 3,
}

impl From<AudioEndReason> for u8 {
    fn from(reason: AudioEndReason) -> Self {
        reason as u8
    }
}

impl TryFrom<u8> for AudioEndReason {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            1 => Ok(Self::RequestEnd),
            2 => Ok(Self::Interrupted),
            3 => Ok(Self::Error),
            other => Err(format!("unknown audio end reason: {}", other)),
        }
    }
}

impl fmt::Display for AudioEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RequestEnd => "request_end",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Severity of a module error. Fatal errors require operator action
/// (e.g. invalid credentials); non-fatal ones only affect one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ModuleErrorCode {
    Fatal,
    NonFatal,
}

impl ModuleErrorCode {
    pub const FATAL_ERROR: i32 = -1000;
    pub const NON_FATAL_ERROR: i32 = 1000;
}

impl From<ModuleErrorCode> for i32 {
    fn from(code: ModuleErrorCode) -> Self {
        match code {
            ModuleErrorCode::Fatal => ModuleErrorCode::FATAL_ERROR,
            ModuleErrorCode::NonFatal => ModuleErrorCode::NON_FATAL_ERROR,
        }
    }
}

impl TryFrom<i32> for ModuleErrorCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            Self::FATAL_ERROR => Ok(Self::Fatal),
            Self::NON_FATAL_ERROR => Ok(Self::NonFatal),
            other => Err(format!("unknown module error code: {}", other)),
        }
    }
}

/// Vendor-side detail attached to a module error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorInfo {
    pub vendor: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleError {
    pub id: String,
    pub module: String,
    pub code: ModuleErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_info: Option<VendorInfo>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ModuleError {
    pub fn new(id: impl Into<String>, code: ModuleErrorCode, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module: defaults::MODULE_NAME.to_string(),
            code,
            message: message.into(),
            vendor_info: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_vendor_info(mut self, info: VendorInfo) -> Self {
        self.vendor_info = Some(info);
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.code == ModuleErrorCode::Fatal
    }
}

/// Named numeric measurements reported by the module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetrics {
    pub id: String,
    pub module: String,
    pub vendor: String,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ModuleMetrics {
    pub fn new(id: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module: defaults::MODULE_NAME.to_string(),
            vendor: vendor.into(),
            metrics: BTreeMap::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_chunk_defaults_missing_fields() {
        let chunk: TextChunk =
            serde_json::from_value(json!({"request_id": "r1", "text": "hi"})).unwrap();
        assert_eq!(chunk, TextChunk::new("r1", "hi"));
        assert!(!chunk.text_input_end);
    }

    #[test]
    fn text_chunk_builder() {
        let chunk = TextChunk::new("r1", "héllo")
            .end()
            .with_metadata("session_id", "s-9");
        assert!(chunk.text_input_end);
        assert_eq!(chunk.metadata["session_id"], json!("s-9"));
        assert_eq!(chunk.char_count(), 5);
    }

    #[test]
    fn audio_end_reason_serializes_as_integer() {
        assert_eq!(serde_json::to_value(AudioEndReason::RequestEnd).unwrap(), json!(1));
        assert_eq!(serde_json::to_value(AudioEndReason::Interrupted).unwrap(), json!(2));
        assert_eq!(serde_json::to_value(AudioEndReason::Error).unwrap(), json!(3));
        assert!(serde_json::from_value::<AudioEndReason>(json!(7)).is_err());
    }

    #[test]
    fn audio_end_reason_decodes_from_integer() {
        assert_eq!(AudioEndReason::try_from(3), Ok(AudioEndReason::Error));
        assert_eq!(
            serde_json::from_value::<AudioEndReason>(json!(2)).unwrap(),
            AudioEndReason::Interrupted
        );
        assert_eq!(
            AudioEndReason::try_from(0),
            Err("unknown audio end reason: 0".to_string())
        );
    }

    #[test]
    fn module_error_code_values() {
        assert_eq!(serde_json::to_value(ModuleErrorCode::Fatal).unwrap(), json!(-1000));
        assert_eq!(
            serde_json::from_value::<ModuleErrorCode>(json!(1000)).unwrap(),
            ModuleErrorCode::NonFatal
        );
    }

    #[test]
    fn module_error_omits_missing_vendor_info() {
        let err = ModuleError::new("e1", ModuleErrorCode::NonFatal, "boom");
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["module"], json!("tts"));
        assert!(value.get("vendor_info").is_none());
        assert!(!err.is_fatal());
    }

    #[test]
    fn module_metrics_collects_values() {
        let metrics = ModuleMetrics::new("m1", "mock")
            .with_metric("ttfb", 120.0)
            .with_metric("chars_in", 4.0);
        assert_eq!(metrics.get("ttfb"), Some(120.0));
        assert_eq!(metrics.get("missing"), None);
    }
}
