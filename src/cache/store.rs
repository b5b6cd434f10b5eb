//! Sharded LRU Store
//!
//! Bounded concurrent key-value store used as the substrate for both the
//! response cache and the invalidation marker cache.
//!
//! # Design
//!
//! - Each shard owns its own `parking_lot::Mutex<LruCache>`, so operations on
//!   keys in different shards never contend
//! - Operations on the same key always land in the same shard and are
//!   serialized by its lock
//! - Per-shard capacities sum exactly to the configured capacity, so the
//!   global bound `size() <= capacity` holds for every interleaving
//! - The default is a single shard, which gives exact LRU eviction for the
//!   whole store. More shards trade that for less contention: eviction is
//!   then exact only within a shard

use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Store sizing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of entries across all shards
    pub capacity: usize,
    /// Requested shard count (clamped to `1..=capacity`). Above one, capacity
    /// is partitioned and eviction picks the LRU entry of the key's shard.
    pub shards: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            shards: 1,
        }
    }
}

impl StoreConfig {
    /// Configuration with a single shard (exact global LRU order)
    pub fn exact(capacity: usize) -> Self {
        Self {
            capacity,
            shards: 1,
        }
    }

    /// Reject configurations that cannot hold a single entry
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("store capacity must be positive".into()));
        }
        if self.shards == 0 {
            return Err(Error::Config("store shard count must be positive".into()));
        }
        Ok(())
    }

    /// Effective shard count after clamping
    pub fn effective_shards(&self) -> usize {
        self.shards.clamp(1, self.capacity.max(1))
    }
}

/// Single shard: an LRU map plus access statistics
pub struct Shard<K, V> {
    map: Mutex<LruCache<K, V>>,
    reads: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Hash + Eq, V> Shard<K, V> {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            map: Mutex::new(LruCache::new(capacity)),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of entries in this shard
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Check if the shard is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum entries this shard may hold
    pub fn capacity(&self) -> usize {
        self.map.lock().cap().get()
    }

    /// Get read count
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Get write count
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.lock().get(key).cloned()
    }

    fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.map.lock().peek(key).cloned()
    }

    fn contains(&self, key: &K) -> bool {
        self.map.lock().contains(key)
    }

    /// Insert under the shard lock, returning the evicted pair (never the
    /// replaced value of `key` itself)
    fn put(&self, key: K, value: V) -> Option<(K, V)> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.lock();
        let existed = guard.contains(&key);
        let displaced = guard.push(key, value);
        drop(guard);

        if existed {
            return None;
        }
        if displaced.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        displaced
    }

    fn update<F>(&self, key: K, f: F) -> V
    where
        V: Clone,
        F: FnOnce(Option<&V>) -> V,
    {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.lock();
        let existed = guard.contains(&key);
        let value = f(guard.peek(&key));
        let displaced = guard.push(key, value.clone());
        drop(guard);

        if !existed && displaced.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.map.lock().pop(key)
    }

    fn clear(&self) {
        self.map.lock().clear();
    }
}

/// Bounded, sharded LRU store
pub struct CacheStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    capacity: usize,
}

impl<K: Hash + Eq, V> CacheStore<K, V> {
    /// Create a store holding at most `config.capacity` entries
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;

        let shard_count = config.effective_shards();
        let base = config.capacity / shard_count;
        let remainder = config.capacity % shard_count;

        let shards = (0..shard_count)
            .map(|i| {
                let cap = base + usize::from(i < remainder);
                NonZeroUsize::new(cap)
                    .map(Shard::new)
                    .ok_or_else(|| Error::Config(format!("shard {} has zero capacity", i)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            shards: shards.into_boxed_slice(),
            capacity: config.capacity,
        })
    }

    /// Create a single-shard store with exact LRU order
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Self::new(&StoreConfig::exact(capacity))
    }

    #[inline]
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Get a value, marking the key most-recently-used
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    /// Get a value without touching recency
    pub fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).peek(key)
    }

    /// Check if a key exists (does not touch recency)
    pub fn contains(&self, key: &K) -> bool {
        self.shard_for(key).contains(key)
    }

    /// Insert or overwrite a value, marking it most-recently-used.
    ///
    /// Returns the entry evicted to make room, if any.
    pub fn put(&self, key: K, value: V) -> Option<(K, V)> {
        self.shard_for(&key).put(key, value)
    }

    /// Atomically compute and store a new value from the current one
    pub fn update<F>(&self, key: K, f: F) -> V
    where
        V: Clone,
        F: FnOnce(Option<&V>) -> V,
    {
        self.shard_for(&key).update(key, f)
    }

    /// Remove a value. Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.shard_for(key).remove(key)
    }

    /// Current entry count
    pub fn size(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of shards in use
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Remove every entry
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }

    /// Total evictions across all shards
    pub fn evictions(&self) -> u64 {
        self.shards.iter().map(|s| s.eviction_count()).sum()
    }

    /// Get detailed statistics
    pub fn stats(&self) -> StoreStats {
        let shard_entry_counts: Vec<usize> = self.shards.iter().map(|s| s.len()).collect();

        StoreStats {
            entries: shard_entry_counts.iter().sum(),
            capacity: self.capacity,
            reads: self.shards.iter().map(|s| s.read_count()).sum(),
            writes: self.shards.iter().map(|s| s.write_count()).sum(),
            evictions: self.evictions(),
            shard_entry_counts,
        }
    }
}

/// Statistics for a store
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Total entries
    pub entries: usize,
    /// Configured capacity
    pub capacity: usize,
    /// Total reads
    pub reads: u64,
    /// Total writes
    pub writes: u64,
    /// Total evictions
    pub evictions: u64,
    /// Per-shard entry counts
    pub shard_entry_counts: Vec<usize>,
}

// =============================================================================
// Tests
// =============================================================================
