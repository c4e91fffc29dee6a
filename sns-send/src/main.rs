//! sns-send - Dispatcher daemon for scheduled social posts
//!
//! Polls the scheduled post ledger and publishes every post that is due.

use anyhow::Context;
use clap::Parser;
use libsnscast::logging::LoggingConfig;
use libsnscast::{Config, SnscastError, SnscastService};
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sns-send")]
#[command(version)]
#[command(about = "Dispatcher daemon for scheduled social posts")]
#[command(long_about = "\
sns-send - Dispatcher daemon for scheduled social posts

DESCRIPTION:
    sns-send is a long-running daemon that publishes scheduled posts to
    Facebook, Instagram, Twitter/X and LinkedIn when they come due.

    On every tick it recovers claims orphaned by a crashed worker, selects
    due posts, claims each one, refreshes expiring access tokens, publishes
    through the platform adapter and records the outcome. Failed posts are
    retried with backoff until their retry budget is spent.

USAGE:
    # Run in foreground (logs to stderr)
    sns-send

    # Run with custom poll interval
    sns-send --poll-interval 30

    # Enable verbose logging
    sns-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight posts)

CONFIGURATION:
    Configuration file: ~/.config/snscast/config.toml (or SNSCAST_CONFIG)

    [scheduling]
    poll_interval = 60      # seconds between ticks
    max_retries = 3         # attempts before a post is exhausted
    retry_delay = 300       # base backoff in seconds
    publish_timeout = 30    # per platform call

    [scheduling.rate_limits.twitter]
    posts_per_hour = 50

    Log output: SNSCAST_LOG_FORMAT (text, json, pretty), SNSCAST_LOG_LEVEL

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
    #[arg(help = "How often to check for due posts (default: from config, 60)")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run one dispatch cycle, print its summary and exit
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env("info", cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<SnscastError>()
            .map(SnscastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(poll_interval) = cli.poll_interval {
        config.scheduling.poll_interval = poll_interval;
    }

    let service = SnscastService::from_config(&config).await?;

    if cli.once {
        let summary = service.dispatcher().run_once().await?;
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_listener(shutdown_tx).context("failed to install signal handlers")?;

    let poll_interval = service.poll_interval();
    info!(
        poll_interval_secs = poll_interval.as_secs(),
        "sns-send daemon starting"
    );

    service
        .dispatcher()
        .run(shutdown_rx, poll_interval)
        .await?;

    info!("sns-send daemon stopped");
    Ok(())
}

/// Flip `shutdown` on SIGINT or SIGTERM.
#[cfg(unix)]
fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "received shutdown signal, finishing in-flight posts");
            let _ = shutdown.send(true);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_listener(shutdown: watch::Sender<bool>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl-C, finishing in-flight posts");
        }
        let _ = shutdown.send(true);
    });

    Ok(())
}
