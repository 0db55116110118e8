//! Command-line interface for ttsflow
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Streaming text-to-speech request lifecycle manager
#[derive(Parser, Debug)]
#[command(
    name = "ttsflow",
    version,
    about = "Drive the TTS request engine with JSON-lines events"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Read inbound events from a file instead of stdin
    #[arg(long, short = 'i', value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Also record synthesized audio to a WAV file
    #[cfg(feature = "wav")]
    #[arg(long, value_name = "FILE")]
    pub wav: Option<PathBuf>,

    /// Usage metrics interval (e.g. 500ms, 5s; 0 disables)
    #[arg(long, value_name = "DURATION", value_parser = parse_millis)]
    pub metrics_interval: Option<u64>,

    /// Pause between input events, simulating a live producer (e.g. 50ms)
    #[arg(long, value_name = "DURATION", value_parser = parse_millis)]
    pub pace: Option<u64>,

    /// Dump raw PCM of every request into this directory
    #[arg(long, value_name = "DIR")]
    pub dump_dir: Option<PathBuf>,
}

/// Parse a duration string into milliseconds.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`250ms`, `5s`, `1m30s`).
fn parse_millis(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["ttsflow"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.input.is_none());
        assert!(cli.metrics_interval.is_none());
        assert!(cli.pace.is_none());
        assert!(cli.dump_dir.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["ttsflow", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_run_options() {
        let cli = Cli::try_parse_from([
            "ttsflow",
            "--input",
            "events.jsonl",
            "--metrics-interval",
            "2s",
            "--pace",
            "50",
            "--dump-dir",
            "/tmp/dumps",
        ])
        .unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("events.jsonl")));
        assert_eq!(cli.metrics_interval, Some(2000));
        assert_eq!(cli.pace, Some(50));
        assert_eq!(cli.dump_dir, Some(PathBuf::from("/tmp/dumps")));
    }

    #[test]
    fn test_parse_millis_formats() {
        assert_eq!(parse_millis("0"), Ok(0));
        assert_eq!(parse_millis("250ms"), Ok(250));
        assert_eq!(parse_millis("1m30s"), Ok(90_000));
        assert!(parse_millis("soon").is_err());
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["ttsflow", "config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Show
            })
        ));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["ttsflow", "completions", "bash"]).unwrap();
        match cli.command {
            Some(Commands::Completions { shell }) => assert_eq!(shell, Shell::Bash),
            other => panic!("Expected Completions, got {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli =
            Cli::try_parse_from(["ttsflow", "config", "path", "--config", "/etc/ttsflow.toml"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/ttsflow.toml")));
    }
}
