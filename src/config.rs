use crate::defaults;
use crate::error::{Result, TtsError};
use crate::lifecycle::assembler::AudioFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub audio: AudioConfig,
    pub dump: DumpConfig,
    pub synth: SynthConfig,
}

/// Request lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Grace period before a completed request's state is purged.
    pub completed_retention_ms: u64,
    /// Interval between usage metrics reports (0 = disabled).
    pub metrics_interval_ms: u64,
    /// Capacity of the outbound event channel.
    pub event_buffer: usize,
}

/// Audio format produced by the built-in synthesizer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub channels: u16,
}

/// Raw PCM dump configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DumpConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

/// Pacing of the built-in tone synthesizer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthConfig {
    pub chunk_delay_ms: u64,
    pub ms_per_char: u32,
    pub tone_hz: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            completed_retention_ms: defaults::COMPLETED_RETENTION_MS,
            metrics_interval_ms: defaults::METRICS_INTERVAL_MS,
            event_buffer: defaults::EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    pub fn completed_retention(&self) -> Duration {
        Duration::from_millis(self.completed_retention_ms)
    }

    /// Returns `None` when periodic metrics are disabled.
    pub fn metrics_interval(&self) -> Option<Duration> {
        (self.metrics_interval_ms > 0).then(|| Duration::from_millis(self.metrics_interval_ms))
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
            channels: defaults::CHANNELS,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.bytes_per_sample, self.channels)
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from(defaults::DUMP_PATH),
        }
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            chunk_delay_ms: defaults::SYNTH_CHUNK_DELAY_MS,
            ms_per_char: defaults::SYNTH_MS_PER_CHAR,
            tone_hz: defaults::SYNTH_TONE_HZ,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(TtsError::ConfigFileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if matches!(
                    e.downcast_ref::<TtsError>(),
                    Some(TtsError::ConfigFileNotFound { .. })
                ) {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TTSFLOW_SAMPLE_RATE → audio.sample_rate
    /// - TTSFLOW_METRICS_INTERVAL_MS → engine.metrics_interval_ms
    /// - TTSFLOW_DUMP_PATH → dump.path (and enables dumping)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(rate) = std::env::var("TTSFLOW_SAMPLE_RATE")
            && let Ok(rate) = rate.parse::<u32>()
        {
            self.audio.sample_rate = rate;
        }

        if let Ok(interval) = std::env::var("TTSFLOW_METRICS_INTERVAL_MS")
            && let Ok(interval) = interval.parse::<u64>()
        {
            self.engine.metrics_interval_ms = interval;
        }

        if let Ok(path) = std::env::var("TTSFLOW_DUMP_PATH")
            && !path.is_empty()
        {
            self.dump.path = PathBuf::from(path);
            self.dump.enabled = true;
        }

        self
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if !(2..=4).contains(&self.audio.bytes_per_sample) {
            return Err(invalid("audio.bytes_per_sample", "must be 2, 3 or 4"));
        }
        if self.audio.channels == 0 {
            return Err(invalid("audio.channels", "must be positive"));
        }
        if self.engine.event_buffer == 0 {
            return Err(invalid("engine.event_buffer", "must be positive"));
        }
        if !(self.synth.tone_hz > 0.0) {
            return Err(invalid("synth.tone_hz", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/ttsflow/config.toml on Linux, or a relative
    /// `ttsflow/config.toml` when no config directory is known.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ttsflow")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> TtsError {
    TtsError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
