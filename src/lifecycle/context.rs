//! Handle through which a synthesizer reports results for one request.

use crate::clock::millis_between;
use crate::lifecycle::assembler::AudioFormat;
use crate::lifecycle::engine::{Inner, lock};
use crate::lifecycle::state::RequestState;
use crate::message::{AudioEndReason, Metadata, ModuleError, ModuleMetrics, TextResult};
use crate::protocol::OutboundEvent;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-request callback surface handed to [`Synthesizer`](crate::synth::Synthesizer).
///
/// Audio bytes are routed through the frame assembler. Once the request has
/// been cancelled, audio and text results are dropped; `audio_end` and
/// `finish_request` still go through so cancellation hooks can close the
/// request.
#[derive(Clone)]
pub struct SynthesisContext {
    inner: Arc<Inner>,
    request_id: String,
    token: CancellationToken,
}

impl fmt::Debug for SynthesisContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisContext")
            .field("request_id", &self.request_id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl SynthesisContext {
    pub(crate) fn new(inner: Arc<Inner>, request_id: String, token: CancellationToken) -> Self {
        Self {
            inner,
            request_id,
            token,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn format(&self) -> AudioFormat {
        self.inner.format
    }

    pub fn vendor(&self) -> &str {
        &self.inner.vendor
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the request is cancelled by a flush or shutdown.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Metadata of the request's first chunk.
    pub fn metadata(&self) -> Metadata {
        self.inner
            .lock_shared()
            .records
            .get(&self.request_id)
            .map(|record| record.metadata.clone())
            .unwrap_or_default()
    }

    pub fn state(&self) -> Option<RequestState> {
        self.inner.lock_shared().states.get(&self.request_id)
    }

    /// Duration of the audio reported so far for this request.
    pub fn audio_duration_ms(&self) -> u64 {
        let bytes = self
            .inner
            .lock_shared()
            .records
            .get(&self.request_id)
            .map_or(0, |record| record.audio_bytes);
        self.inner.format.duration_ms(bytes)
    }

    /// Emits `audio_start` unless it was already sent for this request.
    pub fn send_audio_start(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        let metadata = {
            let mut shared = self.inner.lock_shared();
            let Some(record) = shared.records.get_mut(&self.request_id) else {
                return false;
            };
            if record.audio_started {
                return false;
            }
            record.audio_started = true;
            record.metadata.clone()
        };
        self.inner.emit(OutboundEvent::AudioStart {
            request_id: self.request_id.clone(),
            metadata,
        });
        true
    }

    /// Routes raw synthesized bytes to the frame assembler.
    ///
    /// The first bytes of a request also emit `audio_start` (if not sent yet)
    /// and a `ttfb` metric measured from activation.
    pub fn send_audio_data(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.is_cancelled() {
            tracing::trace!(request_id = %self.request_id, len = bytes.len(), "Dropping audio of cancelled request");
            return;
        }

        let now = self.inner.clock.now();
        let (start, ttfb, timestamp) = {
            let mut shared = self.inner.lock_shared();
            let Some(record) = shared.records.get_mut(&self.request_id) else {
                tracing::warn!(request_id = %self.request_id, "Audio for unknown request dropped");
                return;
            };
            let start = (!record.audio_started).then(|| {
                record.audio_started = true;
                record.metadata.clone()
            });
            let ttfb = record
                .first_audio_at
                .is_none()
                .then(|| (millis_between(record.activated_at, now), record.metadata.clone()));
            let first_audio_at = *record.first_audio_at.get_or_insert(now);
            record.audio_bytes += bytes.len() as u64;
            (start, ttfb, millis_between(first_audio_at, now))
        };

        if let Some(metadata) = start {
            self.inner.emit(OutboundEvent::AudioStart {
                request_id: self.request_id.clone(),
                metadata,
            });
        }
        if let Some((ttfb_ms, metadata)) = ttfb {
            tracing::debug!(request_id = %self.request_id, ttfb_ms, "First audio");
            let mut metrics = ModuleMetrics::new(self.request_id.clone(), self.inner.vendor.clone())
                .with_metric("ttfb", ttfb_ms as f64);
            metrics.metadata = metadata;
            self.inner.emit(OutboundEvent::Metrics(metrics));
        }

        self.inner.metrics.record_audio_bytes(bytes.len() as u64);
        if let Some(dumper) = &self.inner.dumper {
            lock(dumper).write(&self.request_id, bytes);
        }

        // emit under the assembler lock so frames leave in byte order
        let mut assembler = lock(&self.inner.assembler);
        if let Some(frame) = assembler.assemble(bytes, timestamp) {
            self.inner
                .emit(OutboundEvent::audio_frame(self.request_id.clone(), frame));
        }
    }

    pub fn send_text_result(&self, mut result: TextResult) {
        if self.is_cancelled() {
            tracing::trace!(request_id = %self.request_id, "Dropping text result of cancelled request");
            return;
        }
        if result.metadata.is_empty() {
            result.metadata = self.metadata();
        }
        self.inner
            .metrics
            .record_chars_out(result.text.chars().count() as u64);
        self.inner.emit(OutboundEvent::TextResult(result));
    }

    /// Emits `audio_end` once per request. Returns false if it was already
    /// sent or the request is unknown.
    pub fn send_audio_end(&self, reason: AudioEndReason) -> bool {
        let now = self.inner.clock.now();
        let (interval_ms, total_duration_ms, metadata) = {
            let mut shared = self.inner.lock_shared();
            let Some(record) = shared.records.get_mut(&self.request_id) else {
                return false;
            };
            if record.audio_ended {
                return false;
            }
            record.audio_ended = true;
            (
                record
                    .first_audio_at
                    .map_or(0, |first| millis_between(first, now)),
                self.inner.format.duration_ms(record.audio_bytes),
                record.metadata.clone(),
            )
        };
        tracing::debug!(
            request_id = %self.request_id,
            %reason,
            interval_ms,
            total_duration_ms,
            "Audio end"
        );
        self.inner.emit(OutboundEvent::AudioEnd {
            request_id: self.request_id.clone(),
            interval_ms,
            total_duration_ms,
            reason,
            metadata,
        });
        true
    }

    pub fn send_error(&self, mut error: ModuleError) {
        if error.metadata.is_empty() {
            error.metadata = self.metadata();
        }
        self.inner.emit(OutboundEvent::Error(error));
    }

    /// Completes the request and releases the next buffered one.
    ///
    /// Returns false if the request was already completed.
    pub fn finish_request(&self, reason: AudioEndReason) -> bool {
        self.inner.finish_request(&self.request_id, reason)
    }

    /// A fresh error id from the engine's id source.
    pub fn next_id(&self) -> String {
        self.inner.ids.next_id()
    }
}
