//! Cache Store Module
//!
//! Single-shard cache engine combining HashMap storage with LRU tracking, a
//! memory ceiling, TTL expiration, and CAS versions. Not thread-safe on its
//! own; [`ShardedCache`](super::ShardedCache) puts each store behind a lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::error;

use crate::cache::{validate_key, CacheEntry, CacheStats, LruTracker, DEFAULT_MAX_ITEM_SIZE};
use crate::error::{CacheError, Result};

// == Store Limits ==
/// Capacity limits for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Bytes of key + value + overhead the store may hold
    pub memory_limit: usize,
    /// Maximum number of entries (0 = bounded by memory only)
    pub max_entries: usize,
    /// Largest value accepted
    pub max_item_size: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            max_entries: 0,
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
        }
    }
}

// == Cache Store ==
/// Cache storage with LRU eviction, TTL support, and CAS versions.
#[derive(Debug)]
pub struct CacheStore {
    /// Key-value storage
    entries: HashMap<Bytes, CacheEntry>,
    /// LRU access tracker
    lru: LruTracker,
    /// Performance statistics
    stats: CacheStats,
    /// Capacity limits
    limits: StoreLimits,
    /// Bytes currently charged against `limits.memory_limit`
    bytes_used: usize,
    /// Version counter, shared between the shards of one cache
    cas_source: Arc<AtomicU64>,
    /// Set once internal bookkeeping is found inconsistent
    corrupted: bool,
}

impl CacheStore {
    // == Constructor ==
    /// Creates a new CacheStore with its own version counter.
    pub fn new(limits: StoreLimits) -> Self {
        Self::with_cas_source(limits, Arc::new(AtomicU64::new(0)))
    }

    /// Creates a new CacheStore drawing versions from a shared counter.
    pub fn with_cas_source(limits: StoreLimits, cas_source: Arc<AtomicU64>) -> Self {
        let stats = CacheStats {
            memory_limit: limits.memory_limit,
            ..CacheStats::default()
        };
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats,
            limits,
            bytes_used: 0,
            cas_source,
            corrupted: false,
        }
    }

    // == Get ==
    /// Retrieves an entry by key.
    ///
    /// Returns the entry if found and not expired. Expired entries are removed
    /// and counted as misses. Does not extend the expiration.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<CacheEntry>> {
        self.ensure_consistent()?;
        self.purge_if_expired(key);

        match self.entries.get_key_value(key) {
            Some((stored_key, entry)) => {
                let (stored_key, entry) = (stored_key.clone(), entry.clone());
                self.stats.record_hit();
                self.lru.touch(&stored_key);
                Ok(Some(entry))
            }
            None => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    // == Set ==
    /// Stores a value unconditionally, resetting TTL and bumping the version.
    ///
    /// Returns the new version.
    pub fn set(&mut self, key: Bytes, value: Bytes, flags: u32, ttl: i64) -> Result<u64> {
        self.ensure_consistent()?;
        self.validate(&key, &value)?;

        let entry = CacheEntry::new(value, flags, ttl, self.next_cas());
        self.insert_entry(key, entry)
    }

    // == Add ==
    /// Stores a value only if the key is absent or expired.
    pub fn add(&mut self, key: Bytes, value: Bytes, flags: u32, ttl: i64) -> Result<u64> {
        self.ensure_consistent()?;
        self.validate(&key, &value)?;
        self.purge_if_expired(&key);

        if self.entries.contains_key(&key) {
            // memcached bumps the existing item on a failed add
            self.lru.touch(&key);
            return Err(CacheError::KeyExists);
        }
        let entry = CacheEntry::new(value, flags, ttl, self.next_cas());
        self.insert_entry(key, entry)
    }

    // == Replace ==
    /// Stores a value only if the key is present and unexpired.
    pub fn replace(&mut self, key: Bytes, value: Bytes, flags: u32, ttl: i64) -> Result<u64> {
        self.ensure_consistent()?;
        self.validate(&key, &value)?;
        self.purge_if_expired(&key);

        if !self.entries.contains_key(&key) {
            return Err(CacheError::KeyNotFound);
        }
        let entry = CacheEntry::new(value, flags, ttl, self.next_cas());
        self.insert_entry(key, entry)
    }

    // == Compare And Swap ==
    /// Stores a value only if the current version equals `expected`.
    pub fn cas(
        &mut self,
        key: Bytes,
        value: Bytes,
        flags: u32,
        ttl: i64,
        expected: u64,
    ) -> Result<u64> {
        self.ensure_consistent()?;
        self.validate(&key, &value)?;
        self.purge_if_expired(&key);

        match self.entries.get(&key).map(|current| current.cas) {
            None => Err(CacheError::KeyNotFound),
            Some(current) if current != expected => Err(CacheError::VersionMismatch),
            Some(_) => {
                let entry = CacheEntry::new(value, flags, ttl, self.next_cas());
                self.insert_entry(key, entry)
            }
        }
    }

    // == Append / Prepend ==
    /// Concatenates `suffix` after the current value, keeping flags and TTL.
    pub fn append(&mut self, key: &[u8], suffix: &[u8]) -> Result<u64> {
        self.concat(key, suffix, false)
    }

    /// Concatenates `prefix` before the current value, keeping flags and TTL.
    pub fn prepend(&mut self, key: &[u8], prefix: &[u8]) -> Result<u64> {
        self.concat(key, prefix, true)
    }

    fn concat(&mut self, key: &[u8], extra: &[u8], front: bool) -> Result<u64> {
        self.ensure_consistent()?;
        self.purge_if_expired(key);

        let (stored_key, current) = match self.entries.get_key_value(key) {
            Some((k, e)) => (k.clone(), e.clone()),
            None => return Err(CacheError::KeyNotFound),
        };

        let mut joined = BytesMut::with_capacity(current.value.len() + extra.len());
        if front {
            joined.extend_from_slice(extra);
            joined.extend_from_slice(&current.value);
        } else {
            joined.extend_from_slice(&current.value);
            joined.extend_from_slice(extra);
        }
        if joined.len() > self.limits.max_item_size {
            return Err(CacheError::Server("object too large for cache".to_string()));
        }

        let entry = CacheEntry {
            value: joined.freeze(),
            cas: self.next_cas(),
            ..current
        };
        self.insert_entry(stored_key, entry)
    }

    // == Incr / Decr ==
    /// Adds `delta` to a decimal value, wrapping at 64 bits. Returns the new value.
    pub fn incr(&mut self, key: &[u8], delta: u64) -> Result<u64> {
        self.arith(key, |n| n.wrapping_add(delta))
    }

    /// Subtracts `delta` from a decimal value, flooring at zero. Returns the new value.
    pub fn decr(&mut self, key: &[u8], delta: u64) -> Result<u64> {
        self.arith(key, |n| n.saturating_sub(delta))
    }

    fn arith(&mut self, key: &[u8], apply: impl FnOnce(u64) -> u64) -> Result<u64> {
        self.ensure_consistent()?;
        self.purge_if_expired(key);

        let (stored_key, current) = match self.entries.get_key_value(key) {
            Some((k, e)) => (k.clone(), e.clone()),
            None => return Err(CacheError::KeyNotFound),
        };

        let number = parse_decimal(&current.value).ok_or(CacheError::NotANumber)?;
        let updated = apply(number);

        let entry = CacheEntry {
            value: Bytes::from(updated.to_string()),
            cas: self.next_cas(),
            ..current
        };
        self.insert_entry(stored_key, entry)?;
        Ok(updated)
    }

    // == Touch ==
    /// Resets the expiration of a live key without changing its value or version.
    pub fn touch(&mut self, key: &[u8], ttl: i64) -> Result<()> {
        self.ensure_consistent()?;
        self.purge_if_expired(key);

        let stored_key = match self.entries.get_key_value(key) {
            Some((k, _)) => k.clone(),
            None => return Err(CacheError::KeyNotFound),
        };
        if let Some(entry) = self.entries.get_mut(key) {
            entry.set_ttl(ttl);
        }
        self.lru.touch(&stored_key);
        Ok(())
    }

    // == Delete ==
    /// Removes an entry by key.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_consistent()?;
        self.purge_if_expired(key);

        match self.remove_entry(key) {
            Some(_) => Ok(()),
            None => Err(CacheError::KeyNotFound),
        }
    }

    // == Flush ==
    /// Removes every entry.
    pub fn flush_all(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.bytes_used = 0;
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entries.len(),
            bytes_used: self.bytes_used,
            memory_limit: self.limits.memory_limit,
            ..self.stats.clone()
        }
    }

    // == Cleanup Expired ==
    /// Removes all expired entries from the cache.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = crate::cache::current_timestamp_ms();
        let expired_keys: Vec<Bytes> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        let count = expired_keys.len();
        for key in expired_keys {
            self.remove_entry(&key);
        }

        self.stats.record_expirations(count);
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes currently charged against the memory ceiling.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    // == Internals ==

    fn next_cas(&self) -> u64 {
        self.cas_source.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn validate(&self, key: &[u8], value: &[u8]) -> Result<()> {
        validate_key(key)?;
        if value.len() > self.limits.max_item_size {
            return Err(CacheError::Server("object too large for cache".to_string()));
        }
        Ok(())
    }

    fn ensure_consistent(&self) -> Result<()> {
        if self.corrupted {
            return Err(CacheError::Server("cache shard corrupted".to_string()));
        }
        Ok(())
    }

    fn purge_if_expired(&mut self, key: &[u8]) {
        let expired = self.entries.get(key).is_some_and(|e| e.is_expired());
        if expired {
            self.remove_entry(key);
            self.stats.record_expirations(1);
        }
    }

    fn remove_entry(&mut self, key: &[u8]) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.bytes_used = self.bytes_used.saturating_sub(entry.footprint(key));
        Some(entry)
    }

    /// Inserts or overwrites `key`, evicting LRU entries until the write fits.
    fn insert_entry(&mut self, key: Bytes, entry: CacheEntry) -> Result<u64> {
        let footprint = entry.footprint(&key);
        if footprint > self.limits.memory_limit {
            return Err(CacheError::Server("out of memory storing object".to_string()));
        }

        self.remove_entry(&key);

        while self.bytes_used + footprint > self.limits.memory_limit
            || (self.limits.max_entries > 0 && self.entries.len() >= self.limits.max_entries)
        {
            let Some(victim) = self.lru.evict_oldest() else {
                self.corrupted = true;
                error!(
                    bytes_used = self.bytes_used,
                    entries = self.entries.len(),
                    "LRU exhausted while store still over its limits"
                );
                return Err(CacheError::Server("cache shard corrupted".to_string()));
            };
            match self.entries.remove(&victim) {
                Some(evicted) => {
                    self.bytes_used = self.bytes_used.saturating_sub(evicted.footprint(&victim));
                    self.stats.record_eviction();
                }
                None => {
                    self.corrupted = true;
                    error!("LRU tracked a key missing from the entry map");
                    return Err(CacheError::Server("cache shard corrupted".to_string()));
                }
            }
        }

        let cas = entry.cas;
        self.lru.touch(&key);
        self.entries.insert(key, entry);
        self.bytes_used += footprint;
        Ok(cas)
    }
}

/// Parses an unsigned decimal integer stored as text.
fn parse_decimal(value: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(value).ok()?.trim_end_matches(' ');
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}
