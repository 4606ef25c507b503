use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{StoreBackend, TollgateConfig};
use tollgate::http::{router, HttpServer, IdentityPolicy, RateLimitState};
use tollgate::ratelimit::{KeyScheme, RateLimiter};
use tollgate::store::{CounterStore, InMemoryStore, RedisStore};

/// Request quota enforcement service.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the counter store backend
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(backend) = args.store {
        config.store.backend = backend;
    }
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        ip_limit = config.rate_limiting.ip.max_requests,
        token_limit = config.rate_limiting.token.max_requests,
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => {
            Arc::new(RedisStore::connect(&config.store.redis_store_config()).await?)
        }
        StoreBackend::Memory => {
            let store = InMemoryStore::new();
            store.spawn_sweeper(Duration::from_secs(config.store.sweep_interval_secs));
            info!("Using in-memory store; counters are local to this instance");
            Arc::new(store)
        }
    };

    let rate_limiter = RateLimiter::new(store, config.rate_limiting.clone())
        .with_key_scheme(KeyScheme::new(config.store.key_prefix.clone()));
    let state = RateLimitState::new(
        Arc::new(rate_limiter),
        IdentityPolicy::from_config(&config.server)?,
    );

    let server = HttpServer::bind(config.server.listen_addr, router(state)).await?;

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Tollgate stopped");
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
