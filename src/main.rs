use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use tenki::advisory::Fetcher;
use tenki::config::Config;
use tenki::store::Store;

/// Default config file path (~/.config/tenki/config.toml).
fn default_config_path() -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("tenki")
            .join("config.toml"),
    )
}

#[derive(Parser, Debug)]
#[command(
    name = "tenki",
    about = "Polls the JMA weather advisory feed and stores aggregated warnings in SQLite"
)]
struct Args {
    /// Config file path (default: ~/.config/tenki/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Advisory feed URL (overrides config file)
    #[arg(long)]
    url: Option<String>,

    /// Seconds between fetch cycles (overrides config file)
    #[arg(long)]
    interval: Option<u64>,

    /// Maximum concurrent entry fetches (overrides config file)
    #[arg(long)]
    workers: Option<usize>,

    /// SQLite database path (overrides config file)
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    /// Run a single fetch cycle and exit
    #[arg(long)]
    once: bool,
}

/// Load the config file and fold in CLI overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => match default_config_path() {
            Some(path) => Config::load(&path)?,
            None => Config::default(),
        },
    };

    if let Some(url) = &args.url {
        config.feed_url = url.clone();
    }
    if let Some(interval) = args.interval {
        config.interval_secs = interval;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }

    config.validate()?;
    Ok(config)
}

/// Trip the cancellation token on SIGINT/SIGTERM (ctrl-c elsewhere).
fn spawn_signal_listener(cancel: CancellationToken) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGINT handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => tracing::warn!("received SIGTERM"),
            _ = sigint.recv() => tracing::warn!("received SIGINT"),
        }
        cancel.cancel();
    });

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received ctrl-c");
            cancel.cancel();
        }
    });
}

/// One fetch cycle: build the snapshot, log the combined error, persist.
///
/// Partial failure is informational, never fatal; the scheduler moves on to
/// the next tick regardless.
async fn run_cycle(fetcher: &Fetcher, store: &Store, feed_url: &str, cancel: &CancellationToken) {
    let started = Instant::now();
    tracing::info!(url = feed_url, "starting fetch cycle");

    let (snapshot, errors) = fetcher.fetch_snapshot(feed_url, cancel).await;
    if !errors.is_empty() {
        tracing::warn!(failed = errors.len(), "cycle finished with failures: {}", errors);
    }

    match store.put_snapshot(&snapshot).await {
        Ok(written) => tracing::info!(
            records = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetch cycle finished"
        ),
        Err(e) => tracing::error!(error = %e, "failed to persist snapshot"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .user_agent(concat!("tenki/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let store = Store::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open database at {}", config.database_path))?;

    let fetcher = Fetcher::new(client, config.workers);
    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    // The first tick fires immediately, so a fresh start (and --once) fetches
    // without waiting a full interval.
    let mut tick = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!(
        url = %config.feed_url,
        interval_secs = config.interval_secs,
        workers = config.workers,
        "starting tenki"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("shutting down");
                break;
            }
            _ = tick.tick() => {
                run_cycle(&fetcher, &store, &config.feed_url, &cancel).await;
                if args.once {
                    break;
                }
            }
        }
    }

    Ok(())
}
