//! Command Handlers
//!
//! Executes parsed commands against the shared cache and builds the reply for
//! each one. Every store call here is synchronous and returns before the
//! connection touches the network again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::ShardedCache;
use crate::config::Config;
use crate::error::{CacheError, Result};
use crate::protocol::{Command, Response, StorageRequest, ValueItem};

// == Server Metrics ==
/// Server-wide counters reported by `stats`.
#[derive(Debug)]
pub struct ServerMetrics {
    started: Instant,
    pub curr_connections: AtomicU64,
    pub total_connections: AtomicU64,
    pub cmd_get: AtomicU64,
    pub cmd_set: AtomicU64,
    pub cmd_touch: AtomicU64,
    pub cmd_flush: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            curr_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            cmd_get: AtomicU64::new(0),
            cmd_set: AtomicU64::new(0),
            cmd_touch: AtomicU64::new(0),
            cmd_flush: AtomicU64::new(0),
        }
    }

    /// Counts a new connection; the returned guard uncounts it when dropped.
    pub fn track_connection(self: &Arc<Self>) -> ConnectionGuard {
        self.curr_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            metrics: Arc::clone(self),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements `curr_connections` on drop, including when a task is aborted.
#[derive(Debug)]
pub struct ConnectionGuard {
    metrics: Arc<ServerMetrics>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.metrics.curr_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

// == Application State ==
/// State shared by every connection task.
///
/// Holds the single cache instance behind an `Arc`; there is no global.
#[derive(Clone, Debug)]
pub struct AppState {
    pub cache: Arc<ShardedCache>,
    pub metrics: Arc<ServerMetrics>,
    /// Largest data block a storage command may declare
    pub max_item_size: usize,
    /// Cancels work scheduled for later, such as a delayed `flush_all`
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Creates a new AppState around an existing cache.
    pub fn new(cache: Arc<ShardedCache>, max_item_size: usize) -> Self {
        Self {
            cache,
            metrics: Arc::new(ServerMetrics::new()),
            max_item_size,
            shutdown: CancellationToken::new(),
        }
    }

    /// Ties scheduled work to the server's shutdown token.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Creates a new AppState and its cache from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(ShardedCache::from_config(config)),
            config.max_item_size,
        )
    }
}

// == Dispatch ==
/// Executes one command, returning the reply to send, or None when the client
/// asked for `noreply` (or sent `quit`).
pub fn handle_command(state: &AppState, command: Command) -> Option<Response> {
    let noreply = command.noreply();
    let response = match command {
        Command::Get { keys } => get_handler(state, &keys, false),
        Command::Gets { keys } => get_handler(state, &keys, true),
        Command::Set(req) => storage_handler(state, req, |c, r| {
            c.set(r.key, r.data, r.flags, r.exptime)
        }),
        Command::Add(req) => storage_handler(state, req, |c, r| {
            c.add(r.key, r.data, r.flags, r.exptime)
        }),
        Command::Replace(req) => storage_handler(state, req, |c, r| {
            c.replace(r.key, r.data, r.flags, r.exptime)
        }),
        Command::Append(req) => storage_handler(state, req, |c, r| c.append(&r.key, &r.data)),
        Command::Prepend(req) => storage_handler(state, req, |c, r| c.prepend(&r.key, &r.data)),
        Command::Cas {
            request,
            cas_unique,
        } => cas_handler(state, request, cas_unique),
        Command::Delete { key, .. } => match state.cache.delete(&key) {
            Ok(()) => Response::Deleted,
            Err(e) => e.into(),
        },
        Command::Incr { key, delta, .. } => arith_reply(state.cache.incr(&key, delta)),
        Command::Decr { key, delta, .. } => arith_reply(state.cache.decr(&key, delta)),
        Command::Touch { key, exptime, .. } => {
            state.metrics.cmd_touch.fetch_add(1, Ordering::Relaxed);
            match state.cache.touch(&key, exptime) {
                Ok(()) => Response::Touched,
                Err(e) => e.into(),
            }
        }
        Command::FlushAll { delay, .. } => flush_handler(state, delay),
        Command::Stats => stats_handler(state),
        Command::Version => Response::Version(crate::VERSION.to_string()),
        Command::Quit => return None,
    };

    if noreply {
        None
    } else {
        Some(response)
    }
}

/// Handler for `get` / `gets`
fn get_handler(state: &AppState, keys: &[bytes::Bytes], with_cas: bool) -> Response {
    state
        .metrics
        .cmd_get
        .fetch_add(keys.len() as u64, Ordering::Relaxed);

    match state.cache.get_many(keys) {
        Ok(found) => Response::Values {
            items: found
                .into_iter()
                .map(|(key, entry)| ValueItem {
                    key,
                    flags: entry.flags,
                    data: entry.value,
                    cas: entry.cas,
                })
                .collect(),
            with_cas,
        },
        Err(e) => e.into(),
    }
}

/// Handler shared by set/add/replace/append/prepend.
///
/// A failed precondition (key present for add, absent for the others) is
/// reported as `NOT_STORED`.
fn storage_handler(
    state: &AppState,
    request: StorageRequest,
    op: impl FnOnce(&ShardedCache, StorageRequest) -> Result<u64>,
) -> Response {
    state.metrics.cmd_set.fetch_add(1, Ordering::Relaxed);

    match op(&state.cache, request) {
        Ok(_) => Response::Stored,
        Err(CacheError::KeyExists | CacheError::KeyNotFound) => Response::NotStored,
        Err(e) => e.into(),
    }
}

/// Handler for `cas`: mismatch is `EXISTS`, a missing key `NOT_FOUND`.
fn cas_handler(state: &AppState, request: StorageRequest, cas_unique: u64) -> Response {
    state.metrics.cmd_set.fetch_add(1, Ordering::Relaxed);

    match state.cache.cas(
        request.key,
        request.data,
        request.flags,
        request.exptime,
        cas_unique,
    ) {
        Ok(_) => Response::Stored,
        Err(e) => e.into(),
    }
}

fn arith_reply(result: Result<u64>) -> Response {
    match result {
        Ok(value) => Response::Number(value),
        Err(e) => e.into(),
    }
}

/// Handler for `flush_all [delay]`
fn flush_handler(state: &AppState, delay: u32) -> Response {
    state.metrics.cmd_flush.fetch_add(1, Ordering::Relaxed);

    if delay == 0 {
        state.cache.flush_all();
        info!("Cache flushed");
    } else {
        let cache = state.cache.clone();
        let shutdown = state.shutdown.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(delay, "Scheduled flush cancelled");
                }
                _ = tokio::time::sleep(Duration::from_secs(u64::from(delay))) => {
                    cache.flush_all();
                    info!(delay, "Cache flushed after delay");
                }
            }
        });
        debug!(delay, "Cache flush scheduled");
    }
    Response::Ok
}

/// Handler for `stats`
fn stats_handler(state: &AppState) -> Response {
    let cache = state.cache.stats();
    let metrics = &state.metrics;
    let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed).to_string();

    Response::Stats(vec![
        ("pid".to_string(), std::process::id().to_string()),
        ("uptime".to_string(), metrics.uptime().as_secs().to_string()),
        ("time".to_string(), chrono::Utc::now().timestamp().to_string()),
        ("version".to_string(), crate::VERSION.to_string()),
        ("curr_connections".to_string(), load(&metrics.curr_connections)),
        ("total_connections".to_string(), load(&metrics.total_connections)),
        ("cmd_get".to_string(), load(&metrics.cmd_get)),
        ("cmd_set".to_string(), load(&metrics.cmd_set)),
        ("cmd_touch".to_string(), load(&metrics.cmd_touch)),
        ("cmd_flush".to_string(), load(&metrics.cmd_flush)),
        ("get_hits".to_string(), cache.hits.to_string()),
        ("get_misses".to_string(), cache.misses.to_string()),
        ("get_hit_rate".to_string(), format!("{:.4}", cache.hit_rate())),
        ("curr_items".to_string(), cache.total_entries.to_string()),
        ("bytes".to_string(), cache.bytes_used.to_string()),
        ("limit_maxbytes".to_string(), cache.memory_limit.to_string()),
        ("evictions".to_string(), cache.evictions.to_string()),
        ("reclaimed".to_string(), cache.expirations.to_string()),
        ("shards".to_string(), state.cache.shard_count().to_string()),
    ])
}
