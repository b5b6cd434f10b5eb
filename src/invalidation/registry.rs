//! Invalidation Registry
//!
//! Records per-principal invalidation markers and answers whether a cached
//! response predates them.
//!
//! Two invalidation styles are supported:
//!
//! - **By URI** (eager): every cached variant of the URI is removed from the
//!   [`ResponseCache`] immediately.
//! - **By user** (lazy): a marker is written for each user; nothing is
//!   evicted. A cached response is found stale on its next lookup when a
//!   marker for one of its principals is newer than the value it recorded.
//!
//! Marker values come from one shared, strictly increasing sequence. Every
//! user named in a single call receives the same value.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument};
use url::Url;

use super::marker::{InvalidationMark, Principal, PrincipalKey};
use crate::cache::{CacheMetrics, CacheStore, CachedResponseEnvelope, ResponseCache, StoreConfig};
use crate::error::Result;
use crate::http::HttpRequest;

/// Marker table plus the eager-eviction path into the response cache
pub struct InvalidationRegistry {
    markers: CacheStore<String, u64>,
    sequence: AtomicU64,
    cache: Arc<ResponseCache>,
    metrics: Arc<CacheMetrics>,
}

impl InvalidationRegistry {
    /// Create a registry whose marker table is bounded by `config`
    pub fn new(config: &StoreConfig, cache: Arc<ResponseCache>) -> Result<Self> {
        let metrics = Arc::clone(cache.metrics());
        Ok(Self {
            markers: CacheStore::new(config)?,
            sequence: AtomicU64::new(0),
            cache,
            metrics,
        })
    }

    /// The response cache this registry evicts from
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Remove every cached variant of `uris` visible to `app`.
    ///
    /// Returns the number of cached responses removed.
    #[instrument(skip(self, uris), fields(uris = uris.len()))]
    pub fn invalidate_resources(&self, uris: &[Url], app: &str) -> usize {
        let removed = uris
            .iter()
            .map(|uri| self.cache.invalidate_uri(uri, Some(app)))
            .sum();
        info!(removed, "invalidated application resources");
        removed
    }

    /// Write a fresh marker for each of `user_keys` under `app`.
    ///
    /// All users in one call share the drawn marker value, which is returned.
    /// An empty `user_keys` draws nothing and returns `0`.
    #[instrument(skip(self, user_keys))]
    pub fn invalidate_user_resources<I, S>(&self, user_keys: I, app: &str) -> u64
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<PrincipalKey> = user_keys
            .into_iter()
            .map(|user| PrincipalKey::new(app, user.as_ref()))
            .collect();
        if keys.is_empty() {
            return 0;
        }

        let marker = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        for key in &keys {
            let applied = self.markers.update(key.as_str().to_string(), |current| {
                current.map_or(marker, |current| (*current).max(marker))
            });
            debug!(key = %key, marker = applied, "marker written");
        }

        self.metrics.record_user_invalidations(keys.len() as u64);
        info!(users = keys.len(), marker, "invalidated user resources");
        marker
    }

    /// Current marker value for a principal key
    pub fn current(&self, key: &PrincipalKey) -> Option<u64> {
        self.markers.peek(&key.as_str().to_string())
    }

    /// Whether `envelope` predates a marker for any of `principal_keys`.
    ///
    /// A key with no recorded value is stale once any marker exists. A
    /// recorded value whose marker has since been evicted from the table
    /// is also treated as stale.
    pub fn is_invalidated(
        &self,
        envelope: &CachedResponseEnvelope,
        principal_keys: &[PrincipalKey],
    ) -> bool {
        principal_keys.iter().any(|key| {
            match (self.current(key), envelope.recorded_marker(key.as_str())) {
                (Some(current), Some(recorded)) => current > recorded,
                (Some(_), None) => true,
                (None, Some(_)) => true,
                (None, None) => false,
            }
        })
    }

    /// Marker keys for the principals `request` signs
    pub fn principal_keys(&self, request: &HttpRequest) -> Vec<PrincipalKey> {
        self.signed_principals(request)
            .into_iter()
            .map(|(_, key)| key)
            .collect()
    }

    /// Current owner/viewer marker values for `request`
    pub fn mark_for(&self, request: &HttpRequest) -> InvalidationMark {
        let mut mark = InvalidationMark::default();
        for (principal, key) in self.signed_principals(request) {
            if let Some(value) = self.current(&key) {
                mark.set(principal, value);
            }
        }
        mark
    }

    /// Current marker values for `principal_keys`, skipping keys with none
    pub fn snapshot(&self, principal_keys: &[PrincipalKey]) -> BTreeMap<String, u64> {
        principal_keys
            .iter()
            .filter_map(|key| Some((key.as_str().to_string(), self.current(key)?)))
            .collect()
    }

    /// Number of tracked markers
    pub fn marker_count(&self) -> usize {
        self.markers.size()
    }

    /// Last drawn marker value
    pub fn last_marker(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn signed_principals(&self, request: &HttpRequest) -> Vec<(Principal, PrincipalKey)> {
        let Some(app) = request.app_id() else {
            return Vec::new();
        };

        let mut principals = Vec::with_capacity(2);
        if let Some(owner) = request.signed_owner() {
            principals.push((Principal::Owner, PrincipalKey::new(app, owner)));
        }
        if let Some(viewer) = request.signed_viewer() {
            principals.push((Principal::Viewer, PrincipalKey::new(app, viewer)));
        }
        principals
    }
}

impl std::fmt::Debug for InvalidationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationRegistry")
            .field("markers", &self.marker_count())
            .field("last_marker", &self.last_marker())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
