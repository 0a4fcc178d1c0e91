//! Bounded least-recently-used cache for element resolutions.
//!
//! Recency is tracked with a monotonically increasing tick: every hit or
//! insert stamps the entry with a fresh tick, and eviction removes the entry
//! with the smallest one. There is no time-based expiry; callers clear the
//! cache when the data behind it may have been torn down.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Default capacity of a session's resolution cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

struct Slot<V> {
    value: V,
    tick: u64,
}

/// Strict LRU cache with a fixed capacity.
pub struct ResolutionCache<K, V> {
    capacity: usize,
    entries: HashMap<K, Slot<V>>,
    /// Tick -> key, ordered oldest first.
    order: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K, V> ResolutionCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a key, promoting it to most-recently-used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        self.order.remove(&slot.tick);
        slot.tick = tick;
        self.order.insert(tick, key.clone());
        Some(&slot.value)
    }

    /// Look up a key without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace a value, making it most-recently-used.
    ///
    /// Inserting a new key into a full cache first evicts the single
    /// least-recently-used entry, which is returned.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        let tick = self.bump();

        if let Some(slot) = self.entries.get_mut(&key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            slot.value = value;
            self.order.insert(tick, key);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        self.order.insert(tick, key.clone());
        self.entries.insert(key, Slot { value, tick });
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot.value)
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn evict_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.order.pop_first()?;
        let slot = self.entries.remove(&key)?;
        Some((key, slot.value))
    }

    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }
}
