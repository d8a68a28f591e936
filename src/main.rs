use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::TurnstileConfig;
use turnstile::{Context, Limiter};

/// Fire admission checks at a configured limiter and report what got through.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Path to the limiter configuration (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Number of admission checks to run
    #[arg(short = 'n', long, default_value_t = 100)]
    requests: u64,

    /// Client key; enables the per-client quota
    #[arg(short, long)]
    key: Option<String>,

    /// Per-check deadline in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Default)]
struct Tally {
    admitted: u64,
    denied: u64,
    cancelled: u64,
    failed: u64,
}

impl Tally {
    fn record(&mut self, outcome: &turnstile::Result<()>) {
        match outcome {
            Ok(()) => self.admitted += 1,
            Err(e) if e.is_denial() => self.denied += 1,
            Err(e) if e.is_cancellation() => self.cancelled += 1,
            Err(e) => {
                warn!(error = %e, "Admission check failed");
                self.failed += 1;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TurnstileConfig::from_file(&args.config)?;
    let timeout = Duration::from_millis(args.timeout_ms);

    let tally = tokio::select! {
        tally = probe(&config, &args, timeout) => tally?,
        _ = shutdown_signal() => {
            info!("Probe interrupted");
            return Ok(());
        }
    };

    info!(
        requests = args.requests,
        admitted = tally.admitted,
        denied = tally.denied,
        cancelled = tally.cancelled,
        failed = tally.failed,
        "Probe finished"
    );
    Ok(())
}

async fn probe(config: &TurnstileConfig, args: &Args, timeout: Duration) -> anyhow::Result<Tally> {
    let mut tally = Tally::default();

    match &args.key {
        Some(key) => {
            let limiter = config.build_keyed()?;
            for _ in 0..args.requests {
                let ctx = Context::with_timeout(timeout);
                tally.record(&limiter.allow_for(&ctx, key).await);
            }
            limiter.close();
        }
        None => {
            let limiter = config.limiter.build()?;
            for _ in 0..args.requests {
                let ctx = Context::with_timeout(timeout);
                tally.record(&limiter.allow(&ctx).await);
            }
            limiter.close();
        }
    }

    Ok(tally)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
