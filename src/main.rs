use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::oneshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

use callguard::config::GuardConfig;
use callguard::ratelimit::{Decision, SlidingWindowLimiter};

/// Check identity keys read from stdin against a sliding window limit.
#[derive(Debug, Parser)]
#[command(name = "callguard", version, about)]
struct Args {
    /// YAML configuration file; `CALLGUARD_*` environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

/// One line of output per checked key.
#[derive(Debug, Serialize)]
struct DecisionLine<'a> {
    key: &'a str,
    allowed: bool,
    remaining_requests: u32,
    reset_in_secs: u64,
    message: &'a str,
}

impl<'a> DecisionLine<'a> {
    fn new(key: &'a str, decision: &'a Decision) -> Self {
        Self {
            key,
            allowed: decision.allowed,
            remaining_requests: decision.remaining_requests,
            reset_in_secs: decision.reset_in.as_secs(),
            message: &decision.message,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GuardConfig::load(args.config.as_deref())?;
    info!(
        max_requests = config.rate_limiting.max_requests,
        window_ms = config.rate_limiting.window_duration_ms,
        "Configuration loaded"
    );

    let limiter: Arc<SlidingWindowLimiter> =
        Arc::new(SlidingWindowLimiter::new(config.limiter_config()?));

    let (stop_cleanup, cleanup_stopped) = oneshot::channel::<()>();
    let cleanup = config.cleanup_interval().and_then(|interval| {
        limiter.spawn_cleanup_loop(interval, async move {
            let _ = cleanup_stopped.await;
        })
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        let decision = limiter.check_now(key);
        println!("{}", serde_json::to_string(&DecisionLine::new(key, &decision))?);
    }

    let _ = stop_cleanup.send(());
    if let Some(handle) = cleanup {
        handle.await?;
    }

    info!(keys = limiter.key_count(), "callguard stopped");
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

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
