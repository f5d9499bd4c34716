//! Bounded cache with insertion-order (FIFO) eviction
//!
//! Unlike an LRU cache, reads never change which entry is evicted next: the
//! entry that was inserted first is always the first to go.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Counters describing cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently held
    pub len: usize,

    /// Maximum number of entries
    pub capacity: usize,

    /// Number of `put` calls that added a new key
    pub insertions: u64,

    /// Number of entries dropped to stay within capacity
    pub evictions: u64,
}

/// Bounded key/value cache with FIFO eviction
///
/// Holds at most `capacity` distinct keys. When a `put` adds a key beyond
/// that bound, the oldest surviving key by insertion order is evicted.
/// Overwriting an existing key replaces its value in place and keeps its
/// original position in the eviction order.
///
/// The cache is not synchronized; owners that share it across threads keep
/// it behind their own lock.
///
/// # Example
///
/// ```
/// use shelf_cache::FifoCache;
///
/// let mut cache = FifoCache::new(2);
/// cache.put("a", 1);
/// cache.put("b", 2);
/// cache.put("c", 3);
///
/// assert_eq!(cache.get(&"a"), None);
/// assert_eq!(cache.get(&"c"), Some(&3));
/// ```
#[derive(Debug, Clone)]
pub struct FifoCache<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
    insertions: u64,
    evictions: u64,
}

impl<K, V> FifoCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
            insertions: 0,
            evictions: 0,
        }
    }

    /// Look up a value. Has no effect on eviction order or statistics.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or overwrite a value
    ///
    /// # Returns
    ///
    /// The entry evicted to make room, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            return None;
        }

        self.entries.insert(key.clone(), value);
        self.order.push_back(key);
        self.insertions += 1;

        if self.entries.len() > self.capacity {
            self.evict_oldest()
        } else {
            None
        }
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let key = self.order.pop_front()?;
        let value = self.entries.remove(&key)?;
        self.evictions += 1;
        Some((key, value))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Remove every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Remove every entry and hand them back oldest first
    ///
    /// Use this instead of [`clear`](Self::clear) when values own resources
    /// that must be released explicitly.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.entries.len());
        for key in self.order.drain(..) {
            if let Some(value) = self.entries.remove(&key) {
                drained.push((key, value));
            }
        }
        drained
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            len: self.entries.len(),
            capacity: self.capacity,
            insertions: self.insertions,
            evictions: self.evictions,
        }
    }
}
