use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use ayinel_ratelimit::config::{AyinelConfig, LogFormat};
use ayinel_ratelimit::http::{HttpServer, RateLimitGuard};
use ayinel_ratelimit::logging::init_tracing;
use ayinel_ratelimit::ratelimit::{RateLimitStore, Sweeper};

#[derive(Parser, Debug)]
#[command(name = "ayinel-ratelimit")]
#[command(about = "Fixed-window rate limiting service", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the public HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Override the admin listen address
    #[arg(long)]
    admin_addr: Option<SocketAddr>,

    /// Override the log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = AyinelConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(addr) = args.admin_addr {
        config.server.admin_addr = addr;
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }

    init_tracing(&config.logging);

    info!("Starting Ayinel rate limiting service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => info!("No configuration file given, using defaults and environment"),
    }
    // Re-validate after CLI overrides
    config.validate()?;

    let policies = config.rate_limiting.resolved_policies()?;
    info!(
        http_addr = %config.server.http_addr,
        admin_addr = %config.server.admin_addr,
        trust_proxy_headers = config.server.trust_proxy_headers,
        policies = policies.len(),
        "Configuration loaded"
    );

    let store = Arc::new(RateLimitStore::new());
    let sweeper = Sweeper::start(store.clone(), config.rate_limiting.sweep_interval());
    info!(
        interval_secs = sweeper.interval().as_secs(),
        "Expired entries will be swept periodically"
    );

    let guard = RateLimitGuard::new(store, policies)?
        .with_trust_proxy_headers(config.server.trust_proxy_headers);
    for named in guard.policies() {
        info!(
            policy = %named.name,
            window_ms = named.policy.window_duration_ms(),
            max_requests = named.policy.max_requests(),
            "Rate limit policy active"
        );
    }

    let server = HttpServer::new(&config.server, guard);
    let served = server.serve_with_shutdown(shutdown_signal()).await;

    if !sweeper.is_running() {
        warn!("Rate limit sweeper exited before shutdown");
    }
    sweeper.stop().await;
    served?;

    info!("Ayinel rate limiting service stopped");
    Ok(())
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
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
