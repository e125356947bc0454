//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use bytes::Bytes;

/// Relative TTLs above this many seconds are absolute Unix timestamps.
pub const RELATIVE_TTL_LIMIT: i64 = 60 * 60 * 24 * 30;

/// Fixed bookkeeping cost charged per entry on top of key and value bytes.
pub const ENTRY_OVERHEAD: usize = 48;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The stored value
    pub value: Bytes,
    /// Opaque client flags, returned verbatim
    pub flags: u32,
    /// Version token for compare-and-swap
    pub cas: u64,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new cache entry.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `flags` - Client flags
    /// * `ttl` - TTL in memcached convention (see [`expiry_from_ttl`])
    /// * `cas` - Initial version token
    pub fn new(value: Bytes, flags: u32, ttl: i64, cas: u64) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            flags,
            cas,
            created_at: now,
            expires_at: expiry_from_ttl(ttl, now),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time is greater than or equal to
    /// the expiration time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Expiration check against a caller-supplied clock reading.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    /// Resets the expiration using the memcached TTL convention.
    pub fn set_ttl(&mut self, ttl: i64) {
        self.expires_at = expiry_from_ttl(ttl, current_timestamp_ms());
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    #[cfg(test)]
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }

    /// Bytes charged against the memory ceiling for this entry under `key`.
    pub fn footprint(&self, key: &[u8]) -> usize {
        key.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

// == Utility Functions ==
/// Converts a memcached exptime into an absolute expiry in Unix milliseconds.
///
/// - `0` never expires
/// - negative values are already expired
/// - values up to 30 days are relative seconds
/// - larger values are absolute Unix timestamps in seconds
pub fn expiry_from_ttl(ttl: i64, now_ms: u64) -> Option<u64> {
    match ttl {
        0 => None,
        t if t < 0 => Some(now_ms),
        t if t <= RELATIVE_TTL_LIMIT => Some(now_ms.saturating_add(t as u64 * 1000)),
        // Far-future timestamps clamp instead of wrapping
        t => Some((t as u64).saturating_mul(1000)),
    }
}

/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
