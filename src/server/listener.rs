//! TCP Listener
//!
//! Accepts clients and spawns one task per connection, bounded by a
//! semaphore. On shutdown it stops accepting, lets open sessions finish within
//! the grace period and aborts whatever is left.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::server::connection::Connection;
use crate::server::handlers::AppState;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

// == Server ==
/// Listening socket plus everything a connection task needs.
pub struct Server {
    listener: TcpListener,
    state: AppState,
    max_connections: usize,
    idle_timeout: Option<Duration>,
    shutdown_grace: Duration,
}

impl Server {
    /// Binds the configured address.
    pub async fn bind(config: &Config, state: AppState) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        Ok(Self::from_listener(listener, config, state))
    }

    /// Wraps an already bound listener.
    pub fn from_listener(listener: TcpListener, config: &Config, state: AppState) -> Self {
        Self {
            listener,
            state,
            max_connections: config.max_connections.max(1),
            idle_timeout: config.idle_timeout(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` is cancelled, then drains.
    ///
    /// A permit is taken before `accept`, so once `max_connections` sessions
    /// are open further clients wait in the kernel backlog.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let limit = Arc::new(Semaphore::new(self.max_connections));
        let mut sessions = JoinSet::new();

        info!(
            addr = %self.local_addr()?,
            max_connections = self.max_connections,
            "Accepting connections"
        );

        loop {
            while let Some(finished) = sessions.try_join_next() {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!(error = %e, "Connection task panicked");
                    }
                }
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            if let Err(e) = socket.set_nodelay(true) {
                debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let state = self.state.clone();
            let idle_timeout = self.idle_timeout;
            let token = shutdown.child_token();

            sessions.spawn(async move {
                let _permit = permit;
                let _tracked = state.metrics.track_connection();
                info!(%peer, "Client connected");

                let mut connection = Connection::new(socket, peer.to_string(), state, idle_timeout, token);
                if let Err(e) = connection.handle().await {
                    warn!(%peer, error = %e, "Connection error");
                }

                info!(%peer, "Client disconnected");
            });
        }

        info!(open = sessions.len(), "Stopped accepting, draining connections");
        let drain = async {
            while sessions.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                remaining = sessions.len(),
                "Shutdown grace period elapsed, aborting connections"
            );
            sessions.shutdown().await;
        }

        info!("Listener stopped");
        Ok(())
    }
}
