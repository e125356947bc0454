//! Mini Memcache - A lightweight in-memory cache server
//!
//! Serves the memcached text protocol with TTL expiration and LRU eviction.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mini_memcache::{spawn_cleanup_task, AppState, Config, Server};

/// Mini Memcache server
#[derive(Parser, Debug)]
#[command(name = "mini_memcache")]
#[command(about = "In-memory cache server speaking the memcached text protocol")]
#[command(version)]
struct Args {
    /// TCP port (overrides MEMCACHE_PORT)
    port: Option<u16>,

    /// Interface to bind (overrides MEMCACHE_HOST)
    #[arg(long)]
    host: Option<String>,
}

/// Main entry point for the Mini Memcache server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables, then CLI overrides
/// 3. Create the sharded cache
/// 4. Start background TTL cleanup task
/// 5. Bind and serve until SIGINT/SIGTERM
/// 6. Drain connections and stop the cleanup task
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mini_memcache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting Mini Memcache v{}", mini_memcache::VERSION);

    let mut config = Config::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    info!(
        "Configuration loaded: max_memory={}B, max_entries={}, max_item_size={}B, max_connections={}, shards={}",
        config.max_memory_bytes,
        config.max_entries,
        config.max_item_size,
        config.max_connections,
        config.shard_count()
    );

    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&config).with_shutdown(shutdown.child_token());
    info!(shards = state.cache.shard_count(), "Cache store initialized");

    let cleanup_handle = spawn_cleanup_task(
        state.cache.clone(),
        config.cleanup_interval,
        shutdown.child_token(),
    );

    let server = Server::bind(&config, state)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;
    info!("Server listening on {}", server.local_addr()?);

    let mut server_handle = tokio::spawn(server.run(shutdown.clone()));

    tokio::select! {
        signal = shutdown_signal() => signal.context("failed to install signal handlers")?,
        finished = &mut server_handle => {
            // Listener exited on its own; surface why
            shutdown.cancel();
            finished.context("listener task failed")??;
            return Ok(());
        }
    }

    shutdown.cancel();
    server_handle.await.context("listener task failed")??;

    let grace = Duration::from_secs(config.shutdown_grace);
    if tokio::time::timeout(grace, cleanup_handle).await.is_err() {
        warn!("Cleanup task did not stop within the grace period");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
