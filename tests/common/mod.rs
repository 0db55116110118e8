//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use ttsflow::{CollectorSink, Config, EngineHandle, MockSynthesizer, OutboundEvent, TtsEngine};

/// Config with the usage reporter disabled, so only request events show up.
pub fn quiet_config() -> Config {
    let mut config = Config::default();
    config.engine.metrics_interval_ms = 0;
    config
}

pub fn start(config: Config, synth: &MockSynthesizer) -> (EngineHandle, CollectorSink) {
    let sink = CollectorSink::new();
    let engine = TtsEngine::new(config, Arc::new(synth.clone()), Arc::new(sink.clone())).start();
    (engine, sink)
}

/// Polls `check` until it holds, panicking after two seconds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Number of events of `kind` emitted for `request_id`.
pub fn count_for(sink: &CollectorSink, kind: &str, request_id: &str) -> usize {
    sink.of_kind(kind)
        .iter()
        .filter(|event| event.request_id() == Some(request_id))
        .count()
}

/// Index of the first event matching `pred`.
pub fn position<F: Fn(&OutboundEvent) -> bool>(events: &[OutboundEvent], pred: F) -> Option<usize> {
    events.iter().position(pred)
}

/// Concatenated PCM of every frame emitted for `request_id`.
pub fn pcm_of(events: &[OutboundEvent], request_id: &str) -> Vec<u8> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::AudioFrame {
                request_id: id,
                pcm,
                ..
            } if id == request_id => Some(pcm.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect()
}

pub fn is_kind_for(event: &OutboundEvent, kind: &str, request_id: &str) -> bool {
    event.kind() == kind && event.request_id() == Some(request_id)
}
