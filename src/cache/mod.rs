//! Response Cache Subsystem
//!
//! Bounded in-process caching for fetched responses and invalidation markers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          ResponseCache                                │
//! │   Fingerprint ──▶ CachedResponseEnvelope { CacheEntry, markers }      │
//! │   URI index   ──▶ { Fingerprint → app scope }                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                    FreshnessPolicy (admission + TTL)                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                 CacheStore (sharded LRU, N × Mutex<LruCache>)         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The same [`CacheStore`] also backs the invalidation marker table.

mod entry;
mod metrics;
mod policy;
mod response_cache;
mod store;

#[cfg(test)]
mod proptest;

pub use entry::CacheEntry;
pub use metrics::{CacheMetrics, LatencyTracker, MetricsSnapshot};
pub use policy::{FreshnessPolicy, NotCacheableReason, StoreDecision};
pub use response_cache::{CachedResponseEnvelope, ResponseCache};
pub use store::{CacheStore, StoreConfig, StoreStats};

use crate::error::{Error, Result};

/// Default number of cached responses
pub const DEFAULT_RESPONSE_CAPACITY: usize = 10_000;

/// Default number of tracked invalidation markers
pub const DEFAULT_MARKER_CAPACITY: usize = 100_000;

/// Default shard count for both stores (one shard keeps eviction exact LRU)
pub const DEFAULT_SHARDS: usize = 1;

/// Sizing for the response cache and the marker table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Response cache sizing
    pub responses: StoreConfig,
    /// Invalidation marker table sizing
    pub markers: StoreConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            responses: StoreConfig {
                capacity: DEFAULT_RESPONSE_CAPACITY,
                shards: DEFAULT_SHARDS,
            },
            markers: StoreConfig {
                capacity: DEFAULT_MARKER_CAPACITY,
                shards: DEFAULT_SHARDS,
            },
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        self.responses
            .validate()
            .map_err(|e| Error::Config(format!("responses: {}", e)))?;
        self.markers
            .validate()
            .map_err(|e| Error::Config(format!("markers: {}", e)))?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
