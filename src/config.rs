//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to bind
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Memory ceiling for stored items, in bytes
    pub max_memory_bytes: usize,
    /// Maximum number of entries the cache can hold (0 = bounded by memory only)
    pub max_entries: usize,
    /// Largest value accepted by a storage command, in bytes
    pub max_item_size: usize,
    /// Maximum number of concurrently served connections
    pub max_connections: usize,
    /// Idle connection timeout in seconds (0 = never)
    pub idle_timeout: u64,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Grace period in seconds granted to connections on shutdown
    pub shutdown_grace: u64,
    /// Number of store shards (0 = one per available CPU)
    pub shards: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMCACHE_HOST` - Bind address (default: 127.0.0.1)
    /// - `MEMCACHE_PORT` - TCP port (default: 11211)
    /// - `MAX_MEMORY_MB` - Memory ceiling in MiB (default: 64)
    /// - `MAX_ENTRIES` - Maximum cache entries, 0 for unbounded (default: 0)
    /// - `MAX_ITEM_SIZE` - Largest value in bytes (default: 1048576)
    /// - `MAX_CONNECTIONS` - Concurrent connection cap (default: 1024)
    /// - `IDLE_TIMEOUT` - Idle timeout in seconds, 0 disables (default: 0)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `SHUTDOWN_GRACE` - Shutdown grace period in seconds (default: 5)
    /// - `SHARD_COUNT` - Store shards, 0 for CPU count (default: 0)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("MEMCACHE_HOST").unwrap_or(defaults.host),
            port: env_or("MEMCACHE_PORT", defaults.port),
            max_memory_bytes: env::var("MAX_MEMORY_MB")
                .ok()
                .and_then(|v| megabytes_to_bytes(&v))
                .unwrap_or(defaults.max_memory_bytes),
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            max_item_size: env_or("MAX_ITEM_SIZE", defaults.max_item_size),
            max_connections: env_or("MAX_CONNECTIONS", defaults.max_connections),
            idle_timeout: env_or("IDLE_TIMEOUT", defaults.idle_timeout),
            cleanup_interval: env_or("CLEANUP_INTERVAL", defaults.cleanup_interval),
            shutdown_grace: env_or("SHUTDOWN_GRACE", defaults.shutdown_grace),
            shards: env_or("SHARD_COUNT", defaults.shards),
        }
    }

    /// Returns the `host:port` pair to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the idle timeout, or None when disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }

    /// Returns the effective shard count.
    pub fn shard_count(&self) -> usize {
        if self.shards > 0 {
            return self.shards.min(64);
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .clamp(1, 64)
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11211,
            max_memory_bytes: 64 * 1024 * 1024,
            max_entries: 0,
            max_item_size: 1024 * 1024,
            max_connections: 1024,
            idle_timeout: 0,
            cleanup_interval: 1,
            shutdown_grace: 5,
            shards: 0,
        }
    }
}

/// Parses a MiB count, rejecting values whose byte size overflows `usize`.
fn megabytes_to_bytes(value: &str) -> Option<usize> {
    value.parse::<usize>().ok()?.checked_mul(1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.port, 11211);
        assert_eq!(config.max_memory_bytes, 64 * 1024 * 1024);
        assert_eq!(config.max_item_size, 1024 * 1024);
        assert_eq!(config.cleanup_interval, 1);
        assert_eq!(config.listen_addr(), "127.0.0.1:11211");
        assert!(config.idle_timeout().is_none());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for var in [
            "MEMCACHE_HOST",
            "MEMCACHE_PORT",
            "MAX_MEMORY_MB",
            "MAX_ENTRIES",
            "MAX_ITEM_SIZE",
            "MAX_CONNECTIONS",
            "IDLE_TIMEOUT",
            "CLEANUP_INTERVAL",
            "SHUTDOWN_GRACE",
            "SHARD_COUNT",
        ] {
            env::remove_var(var);
        }

        let config = Config::from_env();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 11211);
        assert_eq!(config.max_connections, 1024);
        assert_eq!(config.shutdown_grace, 5);
    }

    #[test]
    fn test_shard_count_clamped() {
        let config = Config {
            shards: 500,
            ..Config::default()
        };
        assert_eq!(config.shard_count(), 64);

        let auto = Config::default().shard_count();
        assert!((1..=64).contains(&auto));
    }

    #[test]
    fn test_memory_megabytes_overflow_rejected() {
        assert_eq!(megabytes_to_bytes("64"), Some(64 * 1024 * 1024));
        assert_eq!(megabytes_to_bytes(&usize::MAX.to_string()), None);
        assert_eq!(megabytes_to_bytes("lots"), None);
    }
}
