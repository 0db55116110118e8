//! JSON event protocol between the transport and the engine.
//!
//! Both directions are tagged with a `type` field in snake_case. Audio
//! payloads are carried as base64 strings.

use crate::lifecycle::assembler::AudioFrame;
use crate::message::{
    AudioEndReason, FlushRequest, Metadata, ModuleError, ModuleMetrics, TextChunk, TextResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events delivered to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    TextInput(TextChunk),
    Flush(FlushRequest),
    /// Opaque configuration forwarded to the synthesizer.
    UpdateConfigs {
        #[serde(default)]
        configs: Value,
    },
}

impl InboundEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Events produced by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    AudioFrame {
        request_id: String,
        sample_rate: u32,
        bytes_per_sample: u16,
        channels: u16,
        #[serde(with = "pcm_base64")]
        pcm: Vec<u8>,
        timestamp: u64,
    },
    TextResult(TextResult),
    AudioStart {
        request_id: String,
        #[serde(default)]
        metadata: Metadata,
    },
    AudioEnd {
        request_id: String,
        interval_ms: u64,
        total_duration_ms: u64,
        reason: AudioEndReason,
        #[serde(default)]
        metadata: Metadata,
    },
    FlushEnd {
        flush_id: String,
        #[serde(default)]
        metadata: Metadata,
    },
    Error(ModuleError),
    Metrics(ModuleMetrics),
    /// Acknowledges a command such as `update_configs`.
    CmdResult {
        name: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl OutboundEvent {
    pub fn audio_frame(request_id: impl Into<String>, frame: AudioFrame) -> Self {
        OutboundEvent::AudioFrame {
            request_id: request_id.into(),
            sample_rate: frame.format.sample_rate,
            bytes_per_sample: frame.format.bytes_per_sample,
            channels: frame.format.channels,
            pcm: frame.pcm,
            timestamp: frame.timestamp,
        }
    }

    /// Short event name, matching the JSON `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::AudioFrame { .. } => "audio_frame",
            OutboundEvent::TextResult(_) => "text_result",
            OutboundEvent::AudioStart { .. } => "audio_start",
            OutboundEvent::AudioEnd { .. } => "audio_end",
            OutboundEvent::FlushEnd { .. } => "flush_end",
            OutboundEvent::Error(_) => "error",
            OutboundEvent::Metrics(_) => "metrics",
            OutboundEvent::CmdResult { .. } => "cmd_result",
        }
    }

    /// Request the event belongs to, when it has one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            OutboundEvent::AudioFrame { request_id, .. }
            | OutboundEvent::AudioStart { request_id, .. }
            | OutboundEvent::AudioEnd { request_id, .. } => Some(request_id),
            OutboundEvent::TextResult(result) => Some(&result.request_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

mod pcm_base64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::assembler::AudioFormat;
    use serde_json::json;

    #[test]
    fn text_input_parses_with_defaults() {
        let event =
            InboundEvent::from_json(r#"{"type":"text_input","request_id":"r1","text":"hi"}"#)
                .unwrap();
        assert_eq!(event, InboundEvent::TextInput(TextChunk::new("r1", "hi")));
    }

    #[test]
    fn flush_parses_metadata() {
        let event = InboundEvent::from_json(
            r#"{"type":"flush","flush_id":"f1","metadata":{"session_id":"s"}}"#,
        )
        .unwrap();
        match event {
            InboundEvent::Flush(flush) => {
                assert_eq!(flush.flush_id, "f1");
                assert_eq!(flush.metadata["session_id"], json!("s"));
            }
            other => panic!("expected flush, got {:?}", other),
        }
    }

    #[test]
    fn update_configs_keeps_payload_opaque() {
        let event = InboundEvent::from_json(
            r#"{"type":"update_configs","configs":{"voice":"alto","speed":1.2}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::UpdateConfigs {
                configs: json!({"voice": "alto", "speed": 1.2})
            }
        );
    }

    #[test]
    fn unknown_inbound_type_is_rejected() {
        assert!(InboundEvent::from_json(r#"{"type":"reboot"}"#).is_err());
        assert!(InboundEvent::from_json("not json").is_err());
    }

    #[test]
    fn audio_frame_pcm_is_base64() {
        let frame = AudioFrame {
            format: AudioFormat::new(16000, 2, 1),
            pcm: vec![0, 1, 2, 3],
            timestamp: 99,
        };
        let event = OutboundEvent::audio_frame("r1", frame);
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], json!("audio_frame"));
        assert_eq!(value["pcm"], json!("AAECAw=="));
        assert_eq!(value["sample_rate"], json!(16000));

        let back = OutboundEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(back, event);
        assert_eq!(back.request_id(), Some("r1"));
    }

    #[test]
    fn audio_end_reason_is_numeric_on_the_wire() {
        let event = OutboundEvent::AudioEnd {
            request_id: "r1".into(),
            interval_ms: 10,
            total_duration_ms: 500,
            reason: AudioEndReason::Interrupted,
            metadata: Metadata::new(),
        };
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], json!("audio_end"));
        assert_eq!(value["reason"], json!(2));
        assert_eq!(event.kind(), "audio_end");
    }

    #[test]
    fn cmd_result_omits_empty_detail() {
        let event = OutboundEvent::CmdResult {
            name: "update_configs".into(),
            ok: true,
            detail: None,
        };
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"type":"cmd_result","name":"update_configs","ok":true}"#
        );
    }
}
