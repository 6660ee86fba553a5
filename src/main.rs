use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use turnstile::{GateConfig, GroupBy, RateLimitGate};

/// Dry-run the rate limit gate against a list of URLs.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the default requests per window
    #[arg(long)]
    max_requests: Option<u32>,

    /// Override the default window length in seconds
    #[arg(long)]
    window_seconds: Option<f64>,

    /// Override the grouping strategy
    #[arg(long, value_enum)]
    group_by: Option<Grouping>,

    /// Number of passes over the URL list
    #[arg(long, default_value_t = 1)]
    rounds: u32,

    /// Pause between checks, in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Print decisions as JSON lines
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// URLs to check
    #[arg(required = true)]
    urls: Vec<Url>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Grouping {
    Global,
    Host,
}

impl From<Grouping> for GroupBy {
    fn from(grouping: Grouping) -> Self {
        match grouping {
            Grouping::Global => GroupBy::Global,
            Grouping::Host => GroupBy::Host,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config =
        GateConfig::load(cli.config.as_deref()).context("Failed to load gate configuration")?;
    if let Some(max_requests) = cli.max_requests {
        config.max_requests = max_requests;
    }
    if let Some(window_seconds) = cli.window_seconds {
        config.window_seconds = window_seconds;
    }
    if let Some(grouping) = cli.group_by {
        config.group_by = grouping.into();
    }

    let gate = RateLimitGate::new(&config).context("Invalid gate configuration")?;

    tokio::select! {
        result = run(&gate, &cli) => result?,
        _ = shutdown_signal() => {}
    }

    info!(groups = ?gate.active_groups(), "Dry run finished");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Check every URL once per round and print each decision.
async fn run(gate: &RateLimitGate, cli: &Cli) -> anyhow::Result<()> {
    let interval = Duration::from_millis(cli.interval_ms);

    for round in 1..=cli.rounds {
        for url in &cli.urls {
            let decision = gate.check(url);

            if cli.json {
                println!("{}", serde_json::to_string(&decision)?);
            } else {
                println!(
                    "round={round} url={url} group={} allowed={} remaining={} reset={}",
                    decision.group,
                    decision.allowed,
                    decision.remaining,
                    chrono::DateTime::from_timestamp_millis(decision.reset_time_millis)
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| decision.reset_time_millis.to_string()),
                );
            }

            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }
    }
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
