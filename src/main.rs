use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, LoggingConfig, TurnstileConfig};
use turnstile::ratelimit::{Janitor, JanitorConfig, Limiter};
use turnstile::simulate::{self, Scenario};

/// Drive a burst of synthetic client requests through a rate limiter.
#[derive(Parser, Debug)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of distinct clients
    #[arg(long, default_value_t = 500)]
    clients: usize,

    /// Requests issued by each client
    #[arg(long, default_value_t = 6)]
    requests_per_client: usize,

    /// Maximum decisions in flight
    #[arg(long, default_value_t = 64)]
    concurrency: usize,

    /// Override the trailing window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Override the admissions allowed per window
    #[arg(long)]
    max_requests: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(window_secs) = args.window_secs {
        config.limiter.window_secs = window_secs;
    }
    if let Some(max_requests) = args.max_requests {
        config.limiter.max_requests_per_window = max_requests;
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting Turnstile");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        path = ?args.config,
        window_secs = config.limiter.window_secs,
        max_requests = config.limiter.max_requests_per_window,
        "Configuration loaded"
    );

    let limiter = Arc::new(Limiter::from_config(&config.limiter)?);
    info!("Rate limiter initialized");

    let janitor = if config.janitor.enabled {
        let schedule = JanitorConfig::from_settings(&config.janitor, limiter.policy().window())?;
        Some(Janitor::spawn(limiter.clone(), schedule))
    } else {
        None
    };

    let scenario = Scenario {
        clients: args.clients,
        requests_per_client: args.requests_per_client,
    };

    tokio::select! {
        report = simulate::run(limiter.clone(), scenario, args.concurrency) => {
            println!(
                "requests={} admitted={} denied={}",
                report.total(),
                report.admitted,
                report.denied
            );
        }
        _ = shutdown_signal() => {
            warn!("Simulation interrupted");
        }
    }

    if let Some(janitor) = janitor {
        janitor.shutdown().await;
    }

    info!("Turnstile stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
