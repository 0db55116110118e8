//! Adapter from a vendor streaming client to a [`Synthesizer`].

use crate::error::{Result, TtsError};
use crate::lifecycle::assembler::AudioFormat;
use crate::lifecycle::context::SynthesisContext;
use crate::message::{AudioEndReason, ModuleError, ModuleErrorCode, TextChunk, TextResult, VendorInfo};
use crate::synth::Synthesizer;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;

/// One event of a vendor response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Audio(Vec<u8>),
    /// The vendor finished this piece of text.
    End,
    /// Credentials were rejected. Fatal for the session.
    InvalidKey(String),
    Error(String),
}

/// Connection to a vendor's streaming synthesis API.
#[async_trait::async_trait]
pub trait StreamingClient: Send + Sync + 'static {
    fn vendor(&self) -> &str;

    fn audio_format(&self) -> AudioFormat;

    /// Starts synthesis of `text` and returns the response stream.
    async fn get(
        &self,
        text: &str,
        request_id: &str,
    ) -> Result<BoxStream<'static, Result<ClientEvent>>>;

    /// Aborts whatever the vendor is currently producing.
    async fn cancel(&self) -> Result<()>;

    async fn update_configs(&self, _configs: Value) -> Result<()> {
        Ok(())
    }
}

pub struct ClientSynthesizer<C: StreamingClient> {
    client: C,
}

impl<C: StreamingClient> ClientSynthesizer<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn vendor_info(&self, code: &str, message: &str) -> VendorInfo {
        VendorInfo {
            vendor: self.client.vendor().to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl<C: StreamingClient> Synthesizer for ClientSynthesizer<C> {
    fn vendor(&self) -> &str {
        self.client.vendor()
    }

    fn audio_format(&self) -> AudioFormat {
        self.client.audio_format()
    }

    async fn request_tts(&self, chunk: TextChunk, ctx: SynthesisContext) -> Result<()> {
        let start_ms = ctx.audio_duration_ms();

        if !chunk.text.trim().is_empty() {
            let mut stream = self.client.get(&chunk.text, &chunk.request_id).await?;
            while let Some(event) = stream.next().await {
                match event? {
                    ClientEvent::Audio(bytes) => {
                        ctx.send_audio_start();
                        ctx.send_audio_data(&bytes);
                    }
                    ClientEvent::End => break,
                    ClientEvent::InvalidKey(message) => {
                        tracing::error!(request_id = %chunk.request_id, "Vendor rejected credentials: {}", message);
                        ctx.send_error(
                            ModuleError::new(ctx.request_id(), ModuleErrorCode::Fatal, &message)
                                .with_vendor_info(self.vendor_info("invalid_key", &message)),
                        );
                        ctx.send_audio_end(AudioEndReason::Error);
                        ctx.finish_request(AudioEndReason::Error);
                        return Ok(());
                    }
                    ClientEvent::Error(message) => {
                        return Err(TtsError::Vendor {
                            vendor: self.client.vendor().to_string(),
                            code: "stream_error".to_string(),
                            message,
                        });
                    }
                }
            }
        } else {
            tracing::debug!(request_id = %chunk.request_id, "Empty text, skipping vendor call");
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
        let cancelled = self.client.cancel().await;
        ctx.send_audio_end(AudioEndReason::Interrupted);
        ctx.finish_request(AudioEndReason::Interrupted);
        cancelled
    }

    async fn update_configs(&self, configs: Value) -> Result<()> {
        self.client.update_configs(configs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::lifecycle::engine::TtsEngine;
    use crate::protocol::OutboundEvent;
    use crate::sink::CollectorSink;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Plays back a fixed event script for every `get`.
    struct ScriptedClient {
        script: Vec<ClientEvent>,
        cancels: Arc<AtomicUsize>,
    }

    impl ScriptedClient {
        fn new(script: Vec<ClientEvent>) -> Self {
            Self {
                script,
                cancels: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl StreamingClient for ScriptedClient {
        fn vendor(&self) -> &str {
            "scripted"
        }

        fn audio_format(&self) -> AudioFormat {
            AudioFormat::new(16000, 2, 1)
        }

        async fn get(
            &self,
            _text: &str,
            _request_id: &str,
        ) -> Result<BoxStream<'static, Result<ClientEvent>>> {
            let events: Vec<Result<ClientEvent>> = self.script.iter().cloned().map(Ok).collect();
            Ok(futures::stream::iter(events).boxed())
        }

        async fn cancel(&self) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn start(client: ScriptedClient) -> (crate::lifecycle::EngineHandle, CollectorSink) {
        let sink = CollectorSink::new();
        let mut config = Config::default();
        config.engine.metrics_interval_ms = 0;
        let engine = TtsEngine::new(
            config,
            Arc::new(ClientSynthesizer::new(client)),
            Arc::new(sink.clone()),
        )
        .start();
        (engine, sink)
    }

    async fn wait_for_kind(sink: &CollectorSink, kind: &str) {
        for _ in 0..200 {
            if !sink.of_kind(kind).is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no {} event", kind);
    }

    #[tokio::test]
    async fn streams_audio_then_ends_request() {
        let (engine, sink) = start(ScriptedClient::new(vec![
            ClientEvent::Audio(vec![1, 2, 3]),
            ClientEvent::Audio(vec![4, 5, 6]),
            ClientEvent::End,
        ]));

        engine
            .producer()
            .send_text(TextChunk::new("r1", "hello").end())
            .await
            .unwrap();
        wait_for_kind(&sink, "audio_end").await;

        let kinds: Vec<&str> = sink
            .events()
            .iter()
            .filter(|e| e.kind() != "metrics")
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec!["audio_start", "audio_frame", "audio_frame", "text_result", "audio_end"]
        );
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_key_is_fatal_error() {
        let (engine, sink) = start(ScriptedClient::new(vec![ClientEvent::InvalidKey(
            "bad key".into(),
        )]));

        engine
            .producer()
            .send_text(TextChunk::new("r1", "hello").end())
            .await
            .unwrap();
        wait_for_kind(&sink, "audio_end").await;

        let errors = sink.of_kind("error");
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            OutboundEvent::Error(err) => {
                assert!(err.is_fatal());
                assert_eq!(err.vendor_info.as_ref().map(|v| v.code.as_str()), Some("invalid_key"));
            }
            other => panic!("unexpected {:?}", other),
        }
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stream_error_becomes_non_fatal_error_with_vendor_info() {
        let (engine, sink) = start(ScriptedClient::new(vec![ClientEvent::Error(
            "overloaded".into(),
        )]));

        engine
            .producer()
            .send_text(TextChunk::new("r1", "hello").end())
            .await
            .unwrap();
        wait_for_kind(&sink, "audio_end").await;

        match &sink.of_kind("error")[0] {
            OutboundEvent::Error(err) => {
                assert!(!err.is_fatal());
                let info = err.vendor_info.as_ref().unwrap();
                assert_eq!(info.vendor, "scripted");
                assert_eq!(info.message, "overloaded");
            }
            other => panic!("unexpected {:?}", other),
        }
        match &sink.of_kind("audio_end")[0] {
            OutboundEvent::AudioEnd { reason, .. } => assert_eq!(*reason, AudioEndReason::Error),
            other => panic!("unexpected {:?}", other),
        }
        engine.stop().await.unwrap();
    }
}
