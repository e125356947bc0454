//! Mini Memcache - A lightweight in-memory cache server
//!
//! Speaks the memcached text protocol over TCP, with TTL expiration, CAS,
//! atomic counters and LRU eviction under a memory ceiling.

pub mod cache;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tasks;

pub use cache::ShardedCache;
pub use config::Config;
pub use error::{CacheError, Result};
pub use server::{AppState, Server};
pub use tasks::spawn_cleanup_task;

/// Version reported by the `version` command and `stats`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
