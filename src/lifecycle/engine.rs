//! The processing loop.
//!
//! One consumer task pulls from the input queue and hands chunks of the
//! single active request to the [`Synthesizer`]. Chunks of other requests
//! wait in the pending buffer until the active request completes. Producers
//! reach the loop only through the queue and the flush gate.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::defaults;
use crate::dump::PcmDumper;
use crate::error::{Result, TtsError};
use crate::id::{IdGenerator, UuidGenerator};
use crate::lifecycle::assembler::{AudioFormat, FrameAssembler};
use crate::lifecycle::context::SynthesisContext;
use crate::lifecycle::gate::{FlushGate, GatePermit};
use crate::lifecycle::metrics::{MetricsAccumulator, spawn_reporter};
use crate::lifecycle::pending::PendingBuffer;
use crate::lifecycle::queue::{InputQueue, QueueItem};
use crate::lifecycle::state::{RequestState, RequestStateMachine};
use crate::message::{
    AudioEndReason, FlushRequest, Metadata, ModuleError, ModuleErrorCode, TextChunk, VendorInfo,
};
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::sink::EventSink;
use crate::synth::Synthesizer;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct ActiveRequest {
    pub(crate) request_id: String,
    pub(crate) token: CancellationToken,
}

/// Per-request bookkeeping behind `audio_start`, `audio_end` and TTFB.
#[derive(Debug)]
pub(crate) struct RequestRecord {
    pub(crate) metadata: Metadata,
    pub(crate) activated_at: Instant,
    pub(crate) first_audio_at: Option<Instant>,
    pub(crate) audio_started: bool,
    pub(crate) audio_ended: bool,
    pub(crate) audio_bytes: u64,
}

impl RequestRecord {
    fn new(metadata: Metadata, activated_at: Instant) -> Self {
        Self {
            metadata,
            activated_at,
            first_audio_at: None,
            audio_started: false,
            audio_ended: false,
            audio_bytes: 0,
        }
    }
}

/// State touched by both producers and the loop. One lock covers the
/// "read active id, then buffer or dispatch" decision.
#[derive(Default)]
pub(crate) struct Shared {
    pub(crate) states: RequestStateMachine,
    pub(crate) pending: PendingBuffer,
    pub(crate) active: Option<ActiveRequest>,
    pub(crate) records: HashMap<String, RequestRecord>,
    /// Set from flush submission until `flush_end` is emitted.
    pub(crate) flushing: bool,
}

pub(crate) struct Inner {
    pub(crate) queue: InputQueue,
    pub(crate) gate: FlushGate,
    pub(crate) shared: Mutex<Shared>,
    pub(crate) assembler: Mutex<FrameAssembler>,
    pub(crate) dumper: Option<Mutex<PcmDumper>>,
    pub(crate) metrics: Arc<MetricsAccumulator>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) synthesizer: Arc<dyn Synthesizer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) format: AudioFormat,
    pub(crate) vendor: String,
    retention: Duration,
    shutdown: CancellationToken,
}

/// Point-in-time view of the engine for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub active: Option<String>,
    pub states: Vec<(String, RequestState)>,
    pub pending: Vec<String>,
    pub pending_chunks: usize,
    pub queue_len: usize,
    pub carry_len: usize,
    pub gate_open: bool,
    pub flushing: bool,
}

impl EngineSnapshot {
    /// Nothing queued, buffered, tracked or carried.
    pub fn is_idle(&self) -> bool {
        self.active.is_none()
            && self.pending.is_empty()
            && self.queue_len == 0
            && self.carry_len == 0
            && !self.flushing
    }
}

/// Builder for a running engine.
pub struct TtsEngine {
    config: Config,
    synthesizer: Arc<dyn Synthesizer>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TtsEngine {
    pub fn new(config: Config, synthesizer: Arc<dyn Synthesizer>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            synthesizer,
            sink,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
        }
    }

    /// Sets a custom clock (for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets a custom id source (for testing).
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Spawns the processing loop and, when enabled, the metrics reporter.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> EngineHandle {
        let format = self.synthesizer.audio_format();
        let vendor = self.synthesizer.vendor().to_string();
        let dumper = self
            .config
            .dump
            .enabled
            .then(|| Mutex::new(PcmDumper::new(self.config.dump.path.clone(), vendor.clone())));

        let inner = Arc::new(Inner {
            queue: InputQueue::new(),
            gate: FlushGate::new(),
            shared: Mutex::new(Shared::default()),
            assembler: Mutex::new(FrameAssembler::new(format)),
            dumper,
            metrics: Arc::new(MetricsAccumulator::new()),
            sink: self.sink,
            synthesizer: self.synthesizer,
            clock: self.clock,
            ids: self.ids,
            format,
            vendor,
            retention: self.config.engine.completed_retention(),
            shutdown: CancellationToken::new(),
        });

        let reporter = self.config.engine.metrics_interval().map(|interval| {
            let cancel = CancellationToken::new();
            let sink = Arc::clone(&inner.sink);
            let ids = Arc::clone(&inner.ids);
            let vendor = inner.vendor.clone();
            let handle = spawn_reporter(
                Arc::clone(&inner.metrics),
                format,
                interval,
                cancel.clone(),
                move |usage| {
                    sink.emit(OutboundEvent::Metrics(
                        usage.to_metrics(ids.next_id(), vendor.clone()),
                    ));
                },
            );
            (cancel, handle)
        });

        tracing::info!(
            vendor = %inner.vendor,
            sample_rate = format.sample_rate,
            bytes_per_sample = format.bytes_per_sample,
            channels = format.channels,
            "TTS engine started"
        );

        let loop_task = tokio::spawn(Arc::clone(&inner).run());

        EngineHandle {
            inner,
            loop_task,
            reporter,
        }
    }
}

/// Owner of a running engine.
pub struct EngineHandle {
    inner: Arc<Inner>,
    loop_task: JoinHandle<()>,
    reporter: Option<(CancellationToken, JoinHandle<()>)>,
}

impl EngineHandle {
    /// A cloneable entry point for inbound events.
    pub fn producer(&self) -> Producer {
        Producer {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.inner.snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.loop_task.is_finished()
    }

    /// Stops the engine.
    ///
    /// Producers are refused from here on, the active request is interrupted,
    /// queued and buffered work is discarded, and dump writers are flushed.
    /// The metrics reporter sends a last report before exiting.
    pub async fn stop(self) -> Result<()> {
        let inner = self.inner;
        inner.shutdown.cancel();
        inner.cancel_active_token();

        let loop_result = self.loop_task.await;

        inner.interrupt_active("engine stopping").await;
        let discarded = inner.queue.drain().len();
        inner.reset();
        if let Some(dumper) = &inner.dumper {
            lock(dumper).flush_all();
        }

        if let Some((cancel, handle)) = self.reporter {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("Metrics reporter ended abnormally: {}", e);
            }
        }

        tracing::info!(discarded, "TTS engine stopped");
        loop_result.map_err(|e| TtsError::Other(format!("processing loop failed: {}", e)))
    }
}

/// Submits inbound events. Cheap to clone; usable from any task.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    fn ensure_running(&self) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TtsError::EngineClosed);
        }
        Ok(())
    }

    /// Enqueues a chunk, waiting while a flush is in progress.
    ///
    /// Fails with [`TtsError::EngineClosed`] if the engine stopped while the
    /// producer was waiting.
    pub async fn send_text(&self, chunk: TextChunk) -> Result<()> {
        self.ensure_running()?;
        let inner = &self.inner;
        inner
            .gate
            .admit(|| -> Result<()> {
                self.ensure_running()?;
                inner.queue.push_back(QueueItem::Text(chunk));
                Ok(())
            })
            .await
    }

    /// Starts a flush: closes the gate, puts the flush marker at the head of
    /// the queue and cancels the active synthesis.
    pub async fn flush(&self, flush: FlushRequest) -> Result<()> {
        self.ensure_running()?;
        let inner = &self.inner;
        tracing::info!(flush_id = %flush.flush_id, "Flush requested");
        inner
            .gate
            .admit(|| -> Result<()> {
                self.ensure_running()?;
                inner.begin_flush();
                let permit = inner.gate.close_held();
                inner.queue.push_front(QueueItem::Flush(flush, permit));
                Ok(())
            })
            .await
    }

    /// Forwards opaque configuration to the synthesizer and reports the
    /// outcome as a `cmd_result` event.
    pub async fn update_configs(&self, configs: Value) -> Result<()> {
        self.ensure_running()?;
        let outcome = self.inner.synthesizer.update_configs(configs).await;
        let detail = match &outcome {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!("Configuration update rejected: {}", e);
                Some(e.to_string())
            }
        };
        self.inner.emit(OutboundEvent::CmdResult {
            name: "update_configs".to_string(),
            ok: outcome.is_ok(),
            detail,
        });
        outcome
    }

    pub async fn dispatch(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::TextInput(chunk) => self.send_text(chunk).await,
            InboundEvent::Flush(flush) => self.flush(flush).await,
            InboundEvent::UpdateConfigs { configs } => self.update_configs(configs).await,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    pub(crate) fn lock_shared(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }

    pub(crate) fn emit(&self, event: OutboundEvent) {
        tracing::trace!(kind = event.kind(), sink = self.sink.name(), "Emitting event");
        self.sink.emit(event);
    }

    async fn run(self: Arc<Self>) {
        tracing::debug!("Processing loop started");
        loop {
            let item = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                item = self.queue.pop() => item,
            };
            match item {
                QueueItem::Flush(flush, permit) => self.run_flush(flush, permit).await,
                QueueItem::Text(chunk) => self.handle_chunk(chunk).await,
            }
        }
        tracing::debug!("Processing loop exited");
    }

    async fn handle_chunk(self: &Arc<Self>, chunk: TextChunk) {
        let request_id = chunk.request_id.clone();
        let token = {
            let mut guard = self.lock_shared();
            let shared = &mut *guard;

            if shared.flushing {
                tracing::debug!(request_id = %request_id, "Chunk discarded, flush pending");
                return;
            }

            let token = match shared.active.as_ref() {
                Some(active) if active.request_id == request_id => active.token.clone(),
                _ if shared.states.get(&request_id) == Some(RequestState::Completed) => {
                    tracing::error!(
                        request_id = %request_id,
                        "Chunk for completed request dropped"
                    );
                    return;
                }
                Some(active) => {
                    tracing::debug!(
                        request_id = %request_id,
                        active = %active.request_id,
                        "Buffering chunk for inactive request"
                    );
                    if !shared.pending.contains(&request_id) {
                        shared.states.register(&request_id);
                    }
                    shared.pending.push(chunk);
                    return;
                }
                None => self.activate(shared, &request_id, chunk.metadata.clone()),
            };

            let now = self.clock.now();
            if shared.states.get(&request_id) == Some(RequestState::Queued) {
                shared
                    .states
                    .transition(&request_id, RequestState::Processing, "activated", now);
            }
            if chunk.text_input_end {
                shared.states.transition(
                    &request_id,
                    RequestState::Finalizing,
                    "text input end",
                    now,
                );
            }
            token
        };

        self.metrics.record_chars_in(chunk.char_count());
        self.dispatch(chunk, token).await;
    }

    /// Makes `request_id` the active request and returns its token.
    fn activate(&self, shared: &mut Shared, request_id: &str, metadata: Metadata) -> CancellationToken {
        let now = self.clock.now();
        for expired in shared.states.purge_completed(now, self.retention) {
            shared.records.remove(&expired);
        }
        shared.states.register(request_id);
        shared.records.insert(
            request_id.to_string(),
            RequestRecord::new(metadata.clone(), now),
        );

        let token = CancellationToken::new();
        shared.active = Some(ActiveRequest {
            request_id: request_id.to_string(),
            token: token.clone(),
        });
        if let Some(dumper) = &self.dumper {
            lock(dumper).start_request(request_id);
        }
        tracing::info!(
            request_id,
            session_id = metadata_str(&metadata, defaults::METADATA_SESSION_ID),
            turn_id = metadata_str(&metadata, defaults::METADATA_TURN_ID),
            "Request activated"
        );
        token
    }

    async fn dispatch(self: &Arc<Self>, chunk: TextChunk, token: CancellationToken) {
        let request_id = chunk.request_id.clone();
        let ctx = SynthesisContext::new(Arc::clone(self), request_id.clone(), token.clone());
        tracing::debug!(
            request_id = %request_id,
            chars = chunk.text.len(),
            end = chunk.text_input_end,
            "Synthesizing chunk"
        );

        let result = tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(request_id = %request_id, "Synthesis cancelled");
                return;
            }
            _ = self.shutdown.cancelled() => {
                tracing::debug!(request_id = %request_id, "Synthesis abandoned on shutdown");
                return;
            }
            result = self.synthesizer.request_tts(chunk, ctx.clone()) => result,
        };

        if let Err(e) = result {
            self.fail_request(&ctx, e);
        }
    }

    /// Reports a synthesis failure and force-completes the request.
    fn fail_request(&self, ctx: &SynthesisContext, err: TtsError) {
        tracing::error!(request_id = ctx.request_id(), "Synthesis failed: {}", err);

        let mut error = ModuleError::new(ctx.request_id(), ModuleErrorCode::NonFatal, err.to_string());
        if let TtsError::Vendor {
            vendor,
            code,
            message,
        } = &err
        {
            error = error.with_vendor_info(VendorInfo {
                vendor: vendor.clone(),
                code: code.clone(),
                message: message.clone(),
            });
        }
        ctx.send_error(error);

        if ctx.state() != Some(RequestState::Completed) {
            ctx.send_audio_end(AudioEndReason::Error);
            ctx.finish_request(AudioEndReason::Error);
        }
    }

    /// Moves `request_id` to `Completed` and releases the next buffered
    /// request, if any.
    pub(crate) fn finish_request(&self, request_id: &str, reason: AudioEndReason) -> bool {
        let (was_active, released) = {
            let mut guard = self.lock_shared();
            let shared = &mut *guard;
            let now = self.clock.now();

            if !shared
                .states
                .transition(request_id, RequestState::Completed, &reason.to_string(), now)
            {
                return false;
            }

            let was_active = shared
                .active
                .as_ref()
                .is_some_and(|active| active.request_id == request_id);
            if was_active {
                shared.active = None;
            }
            tracing::info!(request_id, %reason, "Request finished");

            let released = if was_active && !shared.flushing && !self.shutdown.is_cancelled() {
                shared.pending.pop_first().map(|(next_id, chunks)| {
                    let metadata = chunks
                        .first()
                        .map(|chunk| chunk.metadata.clone())
                        .unwrap_or_default();
                    // active before re-enqueue, so the chunks are not re-buffered
                    self.activate(shared, &next_id, metadata);
                    chunks
                })
            } else {
                None
            };
            (was_active, released)
        };

        if was_active {
            // a partial sample of a finished request can never be completed
            lock(&self.assembler).clear_carry();
        }

        if let Some(chunks) = released {
            tracing::debug!(count = chunks.len(), "Releasing buffered chunks");
            self.queue
                .push_front_many(chunks.into_iter().map(QueueItem::Text).collect());
        }
        true
    }

    /// Marks a flush as pending and cancels the active synthesis. Called
    /// under the gate guard when the flush is submitted.
    fn begin_flush(&self) {
        let mut shared = self.lock_shared();
        shared.flushing = true;
        if let Some(active) = &shared.active {
            tracing::debug!(request_id = %active.request_id, "Cancelling active synthesis for flush");
            active.token.cancel();
        }
    }

    fn cancel_active_token(&self) {
        if let Some(active) = &self.lock_shared().active {
            active.token.cancel();
        }
    }

    async fn run_flush(self: &Arc<Self>, flush: FlushRequest, permit: GatePermit) {
        tracing::info!(flush_id = %flush.flush_id, "Flush started");
        self.lock_shared().flushing = true;

        let mut discarded = self.queue.drain().len();
        self.interrupt_active("flush").await;
        discarded += self.queue.drain().len();

        let buffered = self.lock_shared().pending.chunk_count();
        self.reset();
        if let Some(dumper) = &self.dumper {
            lock(dumper).flush_all();
        }

        tracing::info!(
            flush_id = %flush.flush_id,
            discarded,
            buffered,
            "Flush complete"
        );
        self.emit(OutboundEvent::FlushEnd {
            flush_id: flush.flush_id,
            metadata: flush.metadata,
        });

        self.lock_shared().flushing = false;
        drop(permit);
    }

    /// Cancels the active request and runs the synthesizer's cancellation
    /// hook. Completes the request with `Interrupted` if the hook did not.
    async fn interrupt_active(self: &Arc<Self>, why: &str) {
        let active = {
            let shared = self.lock_shared();
            shared.active.as_ref().and_then(|active| {
                (shared.states.get(&active.request_id) != Some(RequestState::Completed))
                    .then(|| (active.request_id.clone(), active.token.clone()))
            })
        };
        let Some((request_id, token)) = active else {
            return;
        };

        token.cancel();
        tracing::info!(request_id = %request_id, why, "Interrupting active request");

        let ctx = SynthesisContext::new(Arc::clone(self), request_id, token);
        if let Err(e) = self.synthesizer.cancel_tts(ctx.clone()).await {
            tracing::warn!(request_id = ctx.request_id(), "Cancellation hook failed: {}", e);
        }
        if ctx.state() != Some(RequestState::Completed) {
            ctx.send_audio_end(AudioEndReason::Interrupted);
            ctx.finish_request(AudioEndReason::Interrupted);
        }
    }

    /// Clears request states, records, the pending buffer and the carry.
    fn reset(&self) {
        {
            let mut shared = self.lock_shared();
            shared.states.clear();
            shared.pending.clear();
            shared.records.clear();
            shared.active = None;
        }
        lock(&self.assembler).clear_carry();
    }

    fn snapshot(&self) -> EngineSnapshot {
        let (active, states, pending, pending_chunks, flushing) = {
            let shared = self.lock_shared();
            (
                shared.active.as_ref().map(|active| active.request_id.clone()),
                shared.states.snapshot(),
                shared.pending.ids(),
                shared.pending.chunk_count(),
                shared.flushing,
            )
        };
        EngineSnapshot {
            active,
            states,
            pending,
            pending_chunks,
            queue_len: self.queue.len(),
            carry_len: lock(&self.assembler).carry_len(),
            gate_open: self.gate.is_open(),
            flushing,
        }
    }
}
