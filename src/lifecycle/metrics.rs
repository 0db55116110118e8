//! Usage counters reported on a fixed interval and reset each cycle.

use crate::lifecycle::assembler::AudioFormat;
use crate::message::ModuleMetrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    chars_in: AtomicU64,
    chars_out: AtomicU64,
    audio_bytes: AtomicU64,
}

/// Counter values for one report cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsageSnapshot {
    pub chars_in: u64,
    pub chars_out: u64,
    pub audio_duration_ms: u64,
}

impl UsageSnapshot {
    pub fn is_empty(&self) -> bool {
        self.chars_in == 0 && self.chars_out == 0 && self.audio_duration_ms == 0
    }

    pub fn to_metrics(&self, id: impl Into<String>, vendor: impl Into<String>) -> ModuleMetrics {
        ModuleMetrics::new(id, vendor)
            .with_metric("chars_in", self.chars_in as f64)
            .with_metric("chars_out", self.chars_out as f64)
            .with_metric("audio_duration_ms", self.audio_duration_ms as f64)
    }
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chars_in(&self, chars: u64) {
        self.chars_in.fetch_add(chars, Ordering::Relaxed);
    }

    pub fn record_chars_out(&self, chars: u64) {
        self.chars_out.fetch_add(chars, Ordering::Relaxed);
    }

    pub fn record_audio_bytes(&self, bytes: u64) {
        self.audio_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Reads and zeroes all counters.
    pub fn snapshot_and_reset(&self, format: AudioFormat) -> UsageSnapshot {
        UsageSnapshot {
            chars_in: self.chars_in.swap(0, Ordering::Relaxed),
            chars_out: self.chars_out.swap(0, Ordering::Relaxed),
            audio_duration_ms: format.duration_ms(self.audio_bytes.swap(0, Ordering::Relaxed)),
        }
    }
}

/// Spawns a task that reports non-empty snapshots every `interval` and once
/// more when `cancel` fires.
pub fn spawn_reporter<F>(
    metrics: Arc<MetricsAccumulator>,
    format: AudioFormat,
    interval: Duration,
    cancel: CancellationToken,
    report: F,
) -> JoinHandle<()>
where
    F: Fn(UsageSnapshot) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = metrics.snapshot_and_reset(format);
                    if !snapshot.is_empty() {
                        report(snapshot);
                    }
                }
            }
        }
        let snapshot = metrics.snapshot_and_reset(format);
        if !snapshot.is_empty() {
            tracing::debug!(?snapshot, "Final usage report");
            report(snapshot);
        }
    })
}
