//! Cache Module
//!
//! Provides in-memory caching with TTL expiration, LRU eviction under a memory
//! ceiling, and compare-and-swap versioning.

mod entry;
mod lru;
mod sharded;
mod stats;
mod store;


// Re-export public types
pub use entry::{current_timestamp_ms, expiry_from_ttl, CacheEntry, ENTRY_OVERHEAD};
pub use lru::LruTracker;
pub use sharded::ShardedCache;
pub use stats::CacheStats;
pub use store::{CacheStore, StoreLimits};

use crate::error::{CacheError, Result};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 250;

/// Default maximum value size in bytes
pub const DEFAULT_MAX_ITEM_SIZE: usize = 1024 * 1024; // 1 MB

/// Checks that a key is non-empty, at most [`MAX_KEY_LENGTH`] bytes, and free
/// of whitespace and control characters.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::Client("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::Client(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if key.iter().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(CacheError::Client(
            "key contains whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key(b"x").is_ok());
        assert!(validate_key(&[b'k'; MAX_KEY_LENGTH]).is_ok());
        assert!(validate_key(&[b'k'; MAX_KEY_LENGTH + 1]).is_err());
        assert!(validate_key(b"").is_err());
        assert!(validate_key(b"has space").is_err());
        assert!(validate_key(b"bell\x07").is_err());
    }
}
