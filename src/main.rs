use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::time::Duration;
use ttsflow::app::{RunOptions, run_stream};
use ttsflow::cli::{Cli, Commands, ConfigAction};
use ttsflow::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(ms) = cli.metrics_interval {
                config.engine.metrics_interval_ms = ms;
            }
            if let Some(dir) = cli.dump_dir {
                config.dump.enabled = true;
                config.dump.path = dir;
            }

            let options = RunOptions {
                input: cli.input,
                #[cfg(feature = "wav")]
                wav: cli.wav,
                #[cfg(not(feature = "wav"))]
                wav: None,
                pace: cli.pace.map(Duration::from_millis),
                drain_timeout: None,
            };
            let summary = run_stream(config, options).await?;
            if summary.rejected > 0 {
                eprintln!("ttsflow: {} input line(s) rejected", summary.rejected);
            }
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "ttsflow", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the event stream.
fn init_tracing(quiet: bool, verbose: u8) {
    let default_filter = match (quiet, verbose) {
        (true, _) => "ttsflow=warn",
        (false, 0) => "ttsflow=info",
        (false, 1) => "ttsflow=debug",
        (false, _) => "ttsflow=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path())?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&std::path::Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(std::path::PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
