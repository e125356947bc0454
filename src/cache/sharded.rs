//! Sharded Cache Module
//!
//! Partitions the key space over independently locked [`CacheStore`] shards so
//! that operations on keys in different shards run in parallel.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, CacheStore, StoreLimits};
use crate::config::Config;
use crate::error::Result;

// == Sharded Cache ==
/// Thread-safe cache made of N shards, each a `Mutex<CacheStore>`.
///
/// Every operation takes exactly one shard lock for the duration of a
/// synchronous store call, so per-key operations are linearizable and no lock
/// is ever held across an `.await`.
#[derive(Debug)]
pub struct ShardedCache {
    shards: Vec<Mutex<CacheStore>>,
    hasher: RandomState,
}

impl ShardedCache {
    /// Creates a cache with up to `shard_count` shards splitting `limits`.
    ///
    /// The shard count is lowered when needed so every shard can hold at least
    /// two maximum-size items.
    pub fn new(shard_count: usize, limits: StoreLimits) -> Self {
        let item_budget = (limits.max_item_size + crate::cache::ENTRY_OVERHEAD) * 2;
        let affordable = (limits.memory_limit / item_budget.max(1)).max(1);
        let count = shard_count.clamp(1, affordable);

        let shard_limits = StoreLimits {
            memory_limit: limits.memory_limit / count,
            max_entries: if limits.max_entries == 0 {
                0
            } else {
                limits.max_entries.div_ceil(count)
            },
            max_item_size: limits.max_item_size,
        };

        let cas_source = Arc::new(AtomicU64::new(0));
        let shards = (0..count)
            .map(|_| Mutex::new(CacheStore::with_cas_source(shard_limits, cas_source.clone())))
            .collect();

        debug!(shards = count, ?shard_limits, "Sharded cache created");
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    /// Creates a cache from server configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.shard_count(),
            StoreLimits {
                memory_limit: config.max_memory_bytes,
                max_entries: config.max_entries,
                max_item_size: config.max_item_size,
            },
        )
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, key: &[u8]) -> &Mutex<CacheStore> {
        let index = self.hasher.hash_one(key) as usize % self.shards.len();
        &self.shards[index]
    }

    // == Key Operations ==

    pub fn get(&self, key: &[u8]) -> Result<Option<CacheEntry>> {
        self.shard(key).lock().get(key)
    }

    /// Looks up several keys, returning the live ones in request order.
    pub fn get_many(&self, keys: &[Bytes]) -> Result<Vec<(Bytes, CacheEntry)>> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = self.get(key)? {
                found.push((key.clone(), entry));
            }
        }
        Ok(found)
    }

    pub fn set(&self, key: Bytes, value: Bytes, flags: u32, ttl: i64) -> Result<u64> {
        self.shard(&key).lock().set(key, value, flags, ttl)
    }

    pub fn add(&self, key: Bytes, value: Bytes, flags: u32, ttl: i64) -> Result<u64> {
        self.shard(&key).lock().add(key, value, flags, ttl)
    }

    pub fn replace(&self, key: Bytes, value: Bytes, flags: u32, ttl: i64) -> Result<u64> {
        self.shard(&key).lock().replace(key, value, flags, ttl)
    }

    pub fn cas(&self, key: Bytes, value: Bytes, flags: u32, ttl: i64, expected: u64) -> Result<u64> {
        self.shard(&key).lock().cas(key, value, flags, ttl, expected)
    }

    pub fn append(&self, key: &[u8], suffix: &[u8]) -> Result<u64> {
        self.shard(key).lock().append(key, suffix)
    }

    pub fn prepend(&self, key: &[u8], prefix: &[u8]) -> Result<u64> {
        self.shard(key).lock().prepend(key, prefix)
    }

    pub fn incr(&self, key: &[u8], delta: u64) -> Result<u64> {
        self.shard(key).lock().incr(key, delta)
    }

    pub fn decr(&self, key: &[u8], delta: u64) -> Result<u64> {
        self.shard(key).lock().decr(key, delta)
    }

    pub fn touch(&self, key: &[u8], ttl: i64) -> Result<()> {
        self.shard(key).lock().touch(key, ttl)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.shard(key).lock().delete(key)
    }

    // == Whole-Cache Operations ==

    /// Empties every shard, one lock at a time.
    pub fn flush_all(&self) {
        for shard in &self.shards {
            shard.lock().flush_all();
        }
    }

    /// Removes expired entries, locking one shard at a time.
    pub fn cleanup_expired(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().cleanup_expired())
            .sum()
    }

    /// Aggregated statistics across all shards.
    pub fn stats(&self) -> CacheStats {
        let mut total = CacheStats::new();
        for shard in &self.shards {
            total.merge(&shard.lock().stats());
        }
        total
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::thread;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_sharded_round_trip() {
        let cache = ShardedCache::new(8, StoreLimits::default());

        for i in 0..100 {
            let key = format!("key{}", i);
            cache.set(b(&key), b(&format!("value{}", i)), 0, 0).unwrap();
        }

        assert_eq!(cache.len(), 100);
        let entry = cache.get(b"key42").unwrap().unwrap();
        assert_eq!(&entry.value[..], b"value42");
    }

    #[test]
    fn test_shard_count_lowered_for_small_memory() {
        let limits = StoreLimits {
            memory_limit: 3 * 1024 * 1024,
            ..StoreLimits::default()
        };
        let cache = ShardedCache::new(16, limits);
        assert_eq!(cache.shard_count(), 1);
    }

    #[test]
    fn test_get_many_preserves_order_and_skips_missing() {
        let cache = ShardedCache::new(4, StoreLimits::default());
        cache.set(b("a"), b("1"), 0, 0).unwrap();
        cache.set(b("c"), b("3"), 0, 0).unwrap();

        let found = cache.get_many(&[b("c"), b("b"), b("a")]).unwrap();
        let keys: Vec<_> = found.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b("c"), b("a")]);
    }

    #[test]
    fn test_cas_versions_unique_across_shards() {
        let cache = ShardedCache::new(8, StoreLimits::default());
        let mut versions: Vec<u64> = (0..50)
            .map(|i| cache.set(b(&format!("k{}", i)), b("v"), 0, 0).unwrap())
            .collect();
        versions.sort_unstable();
        versions.dedup();
        assert_eq!(versions.len(), 50);
    }

    #[test]
    fn test_concurrent_incr_no_lost_updates() {
        let cache = Arc::new(ShardedCache::new(4, StoreLimits::default()));
        cache.set(b("counter"), b("0"), 0, 0).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        cache.incr(b"counter", 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let entry = cache.get(b"counter").unwrap().unwrap();
        assert_eq!(&entry.value[..], b"8000");
    }

    #[test]
    fn test_concurrent_cas_exactly_one_wins() {
        for _ in 0..20 {
            let cache = Arc::new(ShardedCache::new(4, StoreLimits::default()));
            let version = cache.set(b("k"), b("start"), 0, 0).unwrap();

            let handles: Vec<_> = (0..2)
                .map(|i| {
                    let cache = cache.clone();
                    thread::spawn(move || cache.cas(b("k"), b(&format!("writer{}", i)), 0, 0, version))
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let wins = results.iter().filter(|r| r.is_ok()).count();
            let mismatches = results
                .iter()
                .filter(|r| matches!(r, Err(CacheError::VersionMismatch)))
                .count();
            assert_eq!(wins, 1);
            assert_eq!(mismatches, 1);
        }
    }

    #[test]
    fn test_flush_and_stats() {
        let cache = ShardedCache::new(4, StoreLimits::default());
        cache.set(b("a"), b("1"), 0, 0).unwrap();
        cache.get(b"a").unwrap();
        cache.get(b"zz").unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.memory_limit, StoreLimits::default().memory_limit);

        cache.flush_all();
        assert!(cache.is_empty());
    }
}
