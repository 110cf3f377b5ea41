//! toska-server: a durable key/value node over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toska_gateway::{serve, AppState};
use toska_repl::Follower;
use toska_store::{Store, StoreConfig};

#[derive(Debug, Parser)]
#[command(name = "toska-server", about = "Durable KV store over HTTP/JSON")]
struct Cli {
    /// Configuration file (.toml or .json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory override.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address.
    #[arg(long, default_value = "127.0.0.1:4000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) if path.exists() => StoreConfig::from_file(path)?,
        Some(path) => {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            StoreConfig::default()
        }
        None => StoreConfig::default(),
    };
    config.apply_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    tracing::info!(
        data_dir = %config.data_dir.display(),
        sync_mode = %config.sync_mode,
        follower = config.follower_mode(),
        "toska starting"
    );

    let store = Arc::new(Store::open(config.clone())?);
    let maintenance = store.spawn_maintenance();

    let follower = if config.follower_mode() {
        let follower = Arc::new(Follower::new(
            store.clone(),
            &config.replica_url,
            config.replica_http_timeout_ms,
        )?);
        tokio::spawn(follower.clone().run(
            config.replica_poll_interval_ms,
            store.shutdown_signal(),
        ));
        Some(follower)
    } else {
        None
    };

    let state = AppState::new(store.clone(), follower);
    let shutdown = store.shutdown_signal();

    // Periodic eviction of idle rate-limit buckets.
    {
        let limiter = state.limiter.clone();
        let mut shutdown = store.shutdown_signal();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        limiter.evict_idle(
                            toska_store::now_ms(),
                            toska_gateway::ratelimit::BUCKET_IDLE_MS,
                        );
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    let server = tokio::spawn(serve(state, cli.bind, shutdown));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    store.shutdown().await;

    for handle in maintenance {
        let _ = handle.await;
    }
    server.await??;
    Ok(())
}
