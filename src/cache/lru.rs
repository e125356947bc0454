//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch stamps the key with a fresh tick from a monotonic counter.
/// `order` maps tick -> key, so its first element is the least recently used
/// key and its last element the most recently used one. Touch, remove and
/// evict are all O(log n).
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Current tick per key
    ticks: HashMap<Bytes, u64>,
    /// Keys ordered by tick, oldest first
    order: BTreeMap<u64, Bytes>,
    /// Next tick to hand out
    clock: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &Bytes) {
        let tick = self.clock;
        self.clock += 1;

        if let Some(previous) = self.ticks.insert(key.clone(), tick) {
            self.order.remove(&previous);
        }
        self.order.insert(tick, key.clone());
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &[u8]) {
        if let Some(tick) = self.ticks.remove(key) {
            self.order.remove(&tick);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<Bytes> {
        let (_, key) = self.order.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    #[cfg(test)]
    pub fn peek_oldest(&self) -> Option<&Bytes> {
        self.order.values().next()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.ticks.contains_key(key)
    }

    /// Forgets every tracked key.
    pub fn clear(&mut self) {
        self.ticks.clear();
        self.order.clear();
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_lru_new() {
        let lru = LruTracker::new();
        assert!(lru.is_empty());
        assert_eq!(lru.len(), 0);
        assert!(lru.peek_oldest().is_none());
    }

    #[test]
    fn test_lru_touch_new_key() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.peek_oldest(), Some(&key("key1")));
    }

    #[test]
    fn test_lru_touch_existing_key() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));
        lru.touch(&key("key1"));

        assert_eq!(lru.len(), 3);
        assert_eq!(lru.peek_oldest(), Some(&key("key2")));
    }

    #[test]
    fn test_lru_evict_oldest() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        assert_eq!(lru.evict_oldest(), Some(key("key1")));
        assert_eq!(lru.len(), 2);
        assert!(!lru.contains(b"key1"));

        assert_eq!(lru.evict_oldest(), Some(key("key2")));
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_lru_evict_empty() {
        let mut lru = LruTracker::new();
        assert_eq!(lru.evict_oldest(), None);
    }

    #[test]
    fn test_lru_remove() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key2"));
        lru.touch(&key("key3"));

        lru.remove(b"key2");
        lru.remove(b"nonexistent");

        assert_eq!(lru.len(), 2);
        assert!(!lru.contains(b"key2"));
        assert!(lru.contains(b"key1"));
        assert!(lru.contains(b"key3"));
    }

    #[test]
    fn test_lru_order_after_multiple_touches() {
        let mut lru = LruTracker::new();

        for k in ["a", "b", "c", "a", "c", "b"] {
            lru.touch(&key(k));
        }

        assert_eq!(lru.evict_oldest(), Some(key("a")));
        assert_eq!(lru.evict_oldest(), Some(key("c")));
        assert_eq!(lru.evict_oldest(), Some(key("b")));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_lru_touch_same_key_multiple_times() {
        let mut lru = LruTracker::new();

        lru.touch(&key("key1"));
        lru.touch(&key("key1"));
        lru.touch(&key("key1"));

        assert_eq!(lru.len(), 1);
        assert_eq!(lru.evict_oldest(), Some(key("key1")));
        assert!(lru.is_empty());
    }

    #[test]
    fn test_lru_clear() {
        let mut lru = LruTracker::new();
        lru.touch(&key("a"));
        lru.touch(&key("b"));
        lru.clear();
        assert!(lru.is_empty());
        assert_eq!(lru.evict_oldest(), None);
    }
}
