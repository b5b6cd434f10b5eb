//! Property-Based Tests for the Cache Layer
//!
//! # Test Properties
//!
//! 1. **Capacity Invariant**: `size() <= capacity` after every `put`
//! 2. **LRU Eviction**: inserting `capacity + 1` distinct keys evicts exactly
//!    the least recently accessed key
//! 3. **Freshness Monotonicity**: an entry is fresh at its store time and
//!    stays stale once `now >= expires_at`

#![cfg(test)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use super::metrics::CacheMetrics;
use super::response_cache::ResponseCache;
use super::store::{CacheStore, StoreConfig};
use crate::http::{Fingerprint, HttpRequest, HttpResponseBuilder};

// =============================================================================
// Property Strategies
// =============================================================================

/// Capacity and shard count, shards may exceed capacity (clamped)
fn store_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=32, 1usize..=8)
}

/// Sequence of keys drawn from a small domain so overwrites happen
fn key_sequence_strategy() -> impl Strategy<Value = Vec<u16>> {
    prop::collection::vec(0u16..64, 0..300)
}

/// Operations on a single-shard store: `true` = put, `false` = get
fn op_sequence_strategy() -> impl Strategy<Value = Vec<(bool, u8)>> {
    prop::collection::vec((any::<bool>(), 0u8..16), 0..200)
}

// =============================================================================
// Capacity Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: the store never holds more than its capacity.
    #[test]
    fn prop_size_never_exceeds_capacity(
        (capacity, shards) in store_config_strategy(),
        keys in key_sequence_strategy(),
    ) {
        let store = CacheStore::new(&StoreConfig { capacity, shards })?;

        for (i, key) in keys.into_iter().enumerate() {
            store.put(key, i);
            prop_assert!(store.size() <= capacity);
        }
    }

    /// Property: a single-shard store evicts in exact LRU order, matching a
    /// reference recency list.
    #[test]
    fn prop_single_shard_matches_reference_lru(
        capacity in 1usize..=8,
        ops in op_sequence_strategy(),
    ) {
        let store = CacheStore::new(&StoreConfig::exact(capacity))?;
        // front = least recently used
        let mut model: VecDeque<u8> = VecDeque::new();

        for (is_put, key) in ops {
            if is_put {
                let evicted = store.put(key, key);
                let expected = if let Some(pos) = model.iter().position(|k| *k == key) {
                    model.remove(pos);
                    None
                } else if model.len() == capacity {
                    model.pop_front()
                } else {
                    None
                };
                model.push_back(key);
                prop_assert_eq!(evicted.map(|(k, _)| k), expected);
            } else {
                let hit = store.get(&key);
                if let Some(pos) = model.iter().position(|k| *k == key) {
                    model.remove(pos);
                    model.push_back(key);
                    prop_assert_eq!(hit, Some(key));
                } else {
                    prop_assert_eq!(hit, None);
                }
            }
            prop_assert_eq!(store.size(), model.len());
        }
    }
}

// =============================================================================
// LRU Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: after filling to capacity and touching one key, inserting a
    /// new key evicts exactly the least recently accessed key.
    #[test]
    fn prop_capacity_plus_one_evicts_lru(
        capacity in 2usize..=16,
        touched in any::<prop::sample::Index>(),
    ) {
        let store = CacheStore::new(&StoreConfig::exact(capacity))?;
        for key in 0..capacity {
            store.put(key, key);
        }

        let touched = touched.index(capacity);
        prop_assert_eq!(store.get(&touched), Some(touched));

        let expected = if touched == 0 { 1 } else { 0 };
        let evicted = store.put(capacity, capacity);

        prop_assert_eq!(evicted, Some((expected, expected)));
        prop_assert!(store.contains(&touched));
        prop_assert_eq!(store.size(), capacity);
    }
}

// =============================================================================
// Freshness Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: fresh at store time, never fresh again once expired.
    #[test]
    fn prop_freshness_is_monotonic(
        max_age in 1u64..=3600,
        mut offsets in prop::collection::vec(0i64..=7200, 1..50),
    ) {
        let cache = ResponseCache::new(&StoreConfig::exact(4), Arc::new(CacheMetrics::new()))?;
        let request = HttpRequest::get("http://example.org/gadget.xml")?;
        let response = HttpResponseBuilder::new().body_str("x").max_age(max_age).build();
        let fingerprint = Fingerprint::for_request(&request);
        let stored_at = DateTime::<Utc>::default();

        prop_assert!(cache.store(fingerprint.clone(), &request, &response, BTreeMap::new(), stored_at));
        let envelope = cache.lookup(&fingerprint).ok_or_else(|| TestCaseError::fail("missing entry"))?;
        prop_assert!(cache.is_fresh(&envelope, stored_at));

        offsets.sort_unstable();
        let mut seen_stale = false;
        for offset in offsets {
            let now = stored_at + chrono::Duration::seconds(offset);
            let fresh = cache.is_fresh(&envelope, now);
            prop_assert_eq!(fresh, offset < max_age as i64);
            if seen_stale {
                prop_assert!(!fresh);
            }
            seen_stale |= !fresh;
        }
    }
}
