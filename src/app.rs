//! Demo runner: JSON-lines events in, JSON-lines events out.
//!
//! Inbound events are read line by line and dispatched to an engine driven
//! by the built-in tone synthesizer. Outbound events go to stdout (audio as
//! base64), optionally mirrored into a WAV file.

use crate::config::Config;
use crate::defaults;
use crate::lifecycle::engine::TtsEngine;
use crate::protocol::InboundEvent;
use crate::sink::{EventSink, JsonLinesSink, TeeSink};
use crate::synth::ToneSynthesizer;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Options of a demo run that are not part of [`Config`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input: Option<PathBuf>,
    pub wav: Option<PathBuf>,
    pub pace: Option<Duration>,
    /// Wait for in-flight requests after input ends (default 30s).
    pub drain_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Events dispatched to the engine.
    pub dispatched: usize,
    /// Lines that could not be parsed or were refused.
    pub rejected: usize,
    /// Whether every request finished before the drain timeout.
    pub drained: bool,
}

/// Runs the demo against stdin (or `options.input`) and stdout.
pub async fn run_stream(config: Config, options: RunOptions) -> anyhow::Result<RunSummary> {
    config.validate()?;

    let stdout: Arc<dyn EventSink> = Arc::new(JsonLinesSink::new(std::io::stdout()));
    #[cfg(feature = "wav")]
    let wav = match &options.wav {
        Some(path) => Some(Arc::new(crate::wav::WavSink::create(path, config.audio.format())?)),
        None => None,
    };
    #[cfg(not(feature = "wav"))]
    if options.wav.is_some() {
        anyhow::bail!("WAV output requires the `wav` feature");
    }

    #[allow(unused_mut)]
    let mut sinks = vec![stdout];
    #[cfg(feature = "wav")]
    if let Some(wav) = &wav {
        sinks.push(Arc::clone(wav) as Arc<dyn EventSink>);
    }
    let sink: Arc<dyn EventSink> = Arc::new(TeeSink::new(sinks));

    let summary = match &options.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            run_events(config, BufReader::new(file), sink, &options).await?
        }
        None => run_events(config, BufReader::new(tokio::io::stdin()), sink, &options).await?,
    };

    #[cfg(feature = "wav")]
    if let Some(wav) = wav {
        wav.finalize()?;
    }
    Ok(summary)
}

/// Feeds every line of `reader` to a fresh engine, waits for in-flight
/// requests, then stops the engine.
///
/// Blank lines and lines starting with `#` are skipped.
pub async fn run_events<R>(
    config: Config,
    reader: R,
    sink: Arc<dyn EventSink>,
    options: &RunOptions,
) -> anyhow::Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
{
    let synthesizer = Arc::new(ToneSynthesizer::new(
        config.audio.format(),
        config.synth.clone(),
    ));
    let engine = TtsEngine::new(config, synthesizer, sink).start();
    let producer = engine.producer();

    let mut summary = RunSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event = match InboundEvent::from_json(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = line_no, "Skipping invalid event: {}", e);
                summary.rejected += 1;
                continue;
            }
        };
        match producer.dispatch(event).await {
            Ok(()) => summary.dispatched += 1,
            Err(e) => {
                tracing::warn!(line = line_no, "Event refused: {}", e);
                summary.rejected += 1;
            }
        }

        if let Some(pace) = options.pace {
            tokio::time::sleep(pace).await;
        }
    }

    let drain_timeout = options
        .drain_timeout
        .unwrap_or(Duration::from_secs(defaults::DRAIN_TIMEOUT_SECS));
    summary.drained = wait_idle(&engine, drain_timeout).await;
    if !summary.drained {
        tracing::warn!("Input ended with unfinished requests; interrupting them");
    }
    engine.stop().await?;

    tracing::info!(
        dispatched = summary.dispatched,
        rejected = summary.rejected,
        "Input exhausted"
    );
    Ok(summary)
}

async fn wait_idle(engine: &crate::lifecycle::EngineHandle, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if engine.snapshot().is_idle() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine.snapshot().is_idle()
}
