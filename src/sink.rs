//! Outbound event sinks.
//!
//! The engine emits every event through an [`EventSink`]; the transport that
//! carries events further is someone else's concern.

use crate::protocol::OutboundEvent;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Receiver for outbound events. Must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: OutboundEvent);

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    events: Arc<Mutex<Vec<OutboundEvent>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events of one kind, e.g. `"audio_end"`.
    pub fn of_kind(&self, kind: &str) -> Vec<OutboundEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind() == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventSink for CollectorSink {
    fn emit(&self, event: OutboundEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Forwards events into a bounded crossbeam channel.
///
/// Events are dropped with a warning when the consumer falls behind.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: crossbeam_channel::Sender<OutboundEvent>,
}

impl ChannelSink {
    pub fn new(tx: crossbeam_channel::Sender<OutboundEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink and the receiving end of a channel of `capacity`.
    pub fn bounded(capacity: usize) -> (Self, crossbeam_channel::Receiver<OutboundEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: OutboundEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let kind = e.into_inner().kind();
            tracing::warn!(kind, "Outbound event dropped, channel full or closed");
        }
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send + 'static> {
    writer: Mutex<W>,
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send + 'static> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: OutboundEvent) {
        let line = match event.to_json() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(kind = event.kind(), "Failed to encode event: {}", e);
                return;
            }
        };
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(writer, "{}", line).and_then(|()| writer.flush()) {
            tracing::error!(kind = event.kind(), "Failed to write event: {}", e);
        }
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}

/// Fans one event out to several sinks.
pub struct TeeSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for TeeSink {
    fn emit(&self, event: OutboundEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }

    fn name(&self) -> &'static str {
        "tee"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flush_end(id: &str) -> OutboundEvent {
        OutboundEvent::FlushEnd {
            flush_id: id.to_string(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn event_sink_is_object_safe() {
        let _sink: Arc<dyn EventSink> = Arc::new(CollectorSink::new());
    }

    #[test]
    fn collector_sink_keeps_order() {
        let sink = CollectorSink::new();
        sink.emit(flush_end("a"));
        sink.emit(flush_end("b"));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events(), vec![flush_end("a"), flush_end("b")]);
        assert_eq!(sink.of_kind("flush_end").len(), 2);
        assert!(sink.of_kind("audio_end").is_empty());

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn collector_clones_share_storage() {
        let sink = CollectorSink::new();
        let view = sink.clone();
        sink.emit(flush_end("x"));
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn channel_sink_drops_when_full() {
        let (sink, rx) = ChannelSink::bounded(1);
        sink.emit(flush_end("1"));
        sink.emit(flush_end("2"));
        assert_eq!(rx.try_recv().unwrap(), flush_end("1"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn json_lines_sink_writes_one_line_per_event() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(flush_end("f1"));
        sink.emit(flush_end("f2"));
        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"type":"flush_end","flush_id":"f1","metadata":{}}"#);
    }

    #[test]
    fn tee_sink_fans_out() {
        let a = CollectorSink::new();
        let b = CollectorSink::new();
        let tee = TeeSink::new(vec![Arc::new(a.clone()), Arc::new(b.clone())]);
        tee.emit(flush_end("f"));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }
}
