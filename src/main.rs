#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::uninlined_format_args
)]

use anyhow::{Context, Result};
use chanbot::config::Config;
use chanbot::state::{ChannelStore, Counters, Persistence, SystemClock};
use chanbot::{channels, daemon};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

/// Chat bot runtime for HipChat and Slack rooms.
#[derive(Parser, Debug)]
#[command(name = "chanbot")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CHANBOT_GIT_SHA"), ", built ", env!("CHANBOT_BUILD_TIME"), ")"))]
#[command(about = "Durable multi-backend chat bot.", long_about = None)]
struct Cli {
    /// Config file (default: ~/.chanbot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to every configured backend and serve until signalled
    Start,

    /// Load config and saved state, then report what was found
    Check,

    /// List channels recorded in the saved state
    Channels,

    /// Run health checks against configured backends
    Doctor,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_or_init_at(path),
        None => Config::load_or_init(),
    }
}

fn check(config: &Config) -> Result<()> {
    let store = Arc::new(ChannelStore::new(
        Arc::new(SystemClock),
        config.throttle.default_secs,
    ));
    let counters = Arc::new(Counters::new());
    let persistence = Persistence::new(
        config.state.channels_path(),
        config.state.counters_path(),
        Arc::clone(&store),
        Arc::clone(&counters),
    );
    let report = persistence
        .load()
        .context("Saved state is unreadable")?;

    println!("Config:   {}", config.config_path.display());
    println!("State:    {}", persistence.channels_path().display());
    println!("Channels: {}", store.len());
    println!("Repaired: {}", report.repaired);
    if !report.pruned.is_empty() {
        println!("Pruned:   {}", report.pruned.join(", "));
    }
    if !config.has_backends() {
        println!("No chat backends configured yet.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Warning: Failed to install default crypto provider: {e:?}");
    }

    let cli = Cli::parse();

    // Respects RUST_LOG; defaults to info (debug with --verbose)
    let default_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Start => {
            tracing::info!(
                "chanbot {} ({}) starting",
                env!("CARGO_PKG_VERSION"),
                env!("CHANBOT_GIT_SHA")
            );
            daemon::run(config).await
        }
        Commands::Check => check(&config),
        Commands::Channels => channels::list_channels(&config),
        Commands::Doctor => channels::doctor_channels(config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent_and_unattributed() {
        let cmd = Cli::command();
        cmd.clone().debug_assert();
        assert!(cmd.get_author().is_none());
        assert_eq!(cmd.get_name(), "chanbot");
    }

    #[test]
    fn verbose_is_accepted_after_subcommand() {
        let cli = Cli::try_parse_from(["chanbot", "check", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Check));
    }
}
