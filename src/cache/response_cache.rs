//! Response Cache
//!
//! Fingerprint-keyed cache of fetched responses layered over [`CacheStore`].
//!
//! Each stored response is wrapped in a [`CachedResponseEnvelope`] that
//! records the invalidation marker values in effect when it was written, so a
//! later lookup can tell whether the response predates an invalidation.
//! A secondary index maps every normalized URI to the fingerprints cached
//! for it, which lets URI invalidation remove all variants eagerly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};
use url::Url;

use super::entry::CacheEntry;
use super::metrics::CacheMetrics;
use super::policy::{FreshnessPolicy, StoreDecision};
use super::store::{CacheStore, StoreConfig, StoreStats};
use crate::error::Result;
use crate::http::{Fingerprint, HttpRequest, HttpResponse};

/// A cached response plus the marker values observed when it was stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponseEnvelope {
    entry: CacheEntry,
    embedded_marker_version: BTreeMap<String, u64>,
    uri: String,
    app_scope: Option<String>,
    strict_no_cache: bool,
}

impl CachedResponseEnvelope {
    pub fn new(
        entry: CacheEntry,
        embedded_marker_version: BTreeMap<String, u64>,
        uri: &Url,
        app_scope: Option<String>,
        strict_no_cache: bool,
    ) -> Self {
        Self {
            entry,
            embedded_marker_version,
            uri: uri.as_str().to_string(),
            app_scope,
            strict_no_cache,
        }
    }

    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    /// The stored response, byte-identical to what was fetched
    pub fn response(&self) -> HttpResponse {
        self.entry.to_response()
    }

    /// Principal key → marker value at store time
    pub fn embedded_marker_version(&self) -> &BTreeMap<String, u64> {
        &self.embedded_marker_version
    }

    /// Marker value recorded for `principal_key`, if any
    pub fn recorded_marker(&self, principal_key: &str) -> Option<u64> {
        self.embedded_marker_version.get(principal_key).copied()
    }

    /// Normalized URI the response was fetched from
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Application the response was fetched for (authenticated requests only)
    pub fn app_scope(&self) -> Option<&str> {
        self.app_scope.as_deref()
    }

    /// Stored but must be refetched on every use
    pub fn is_strict_no_cache(&self) -> bool {
        self.strict_no_cache
    }
}

/// Fingerprint-keyed response cache
pub struct ResponseCache {
    store: CacheStore<Fingerprint, Arc<CachedResponseEnvelope>>,
    /// normalized URI → fingerprints cached for it, with their app scope
    by_uri: DashMap<String, HashMap<Fingerprint, Option<String>>>,
    policy: FreshnessPolicy,
    metrics: Arc<CacheMetrics>,
}

impl ResponseCache {
    /// Create a cache bounded by `config`
    pub fn new(config: &StoreConfig, metrics: Arc<CacheMetrics>) -> Result<Self> {
        Self::with_policy(config, FreshnessPolicy::default(), metrics)
    }

    /// Create a cache with a custom freshness policy
    pub fn with_policy(
        config: &StoreConfig,
        policy: FreshnessPolicy,
        metrics: Arc<CacheMetrics>,
    ) -> Result<Self> {
        Ok(Self {
            store: CacheStore::new(config)?,
            by_uri: DashMap::new(),
            policy,
            metrics,
        })
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Look up a cached response. Absence is not an error.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<CachedResponseEnvelope>> {
        self.store.get(fingerprint)
    }

    /// Within its TTL and not marked strict no-cache
    pub fn is_fresh(&self, envelope: &CachedResponseEnvelope, now: DateTime<Utc>) -> bool {
        !envelope.is_strict_no_cache() && !envelope.entry().is_expired(now)
    }

    /// Store `response` under `fingerprint` if the admission policy allows it.
    ///
    /// `markers` is the marker snapshot for the principals `request` touches.
    /// Returns whether the response was written.
    pub fn store(
        &self,
        fingerprint: Fingerprint,
        request: &HttpRequest,
        response: &HttpResponse,
        markers: BTreeMap<String, u64>,
        now: DateTime<Utc>,
    ) -> bool {
        let expires_at = match self.policy.decide(request, response, now) {
            StoreDecision::Cacheable { expires_at } => expires_at,
            StoreDecision::NotCacheable(reason) => {
                trace!(uri = %request.uri(), %reason, "response not cacheable");
                self.metrics.record_not_cacheable();
                return false;
            }
        };

        let app_scope = request.app_id().map(str::to_string);
        let entry = CacheEntry::new(fingerprint.clone(), response, now, Some(expires_at));
        let envelope = CachedResponseEnvelope::new(
            entry,
            markers,
            request.uri(),
            app_scope.clone(),
            response.is_strict_no_cache(),
        );

        // Index and write under the URI's index lock so a concurrent
        // invalidation of the same URI sees both or neither
        let evicted = {
            let mut variants = self.by_uri.entry(envelope.uri().to_string()).or_default();
            variants.insert(fingerprint.clone(), app_scope);
            self.store.put(fingerprint, Arc::new(envelope))
        };

        if let Some((evicted_key, evicted)) = evicted {
            debug!(fingerprint = %evicted_key, uri = %evicted.uri(), "evicted least recently used response");
            self.unindex(evicted.uri(), &evicted_key);
            self.metrics.record_eviction();
        }
        self.metrics.record_store();
        true
    }

    /// Remove one cached response. Removing an absent fingerprint is a no-op.
    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<Arc<CachedResponseEnvelope>> {
        let removed = self.store.remove(fingerprint)?;
        self.unindex(removed.uri(), fingerprint);
        Some(removed)
    }

    /// Remove every variant cached for `uri` whose app scope is unset or
    /// equals `app`. Returns how many entries were removed.
    pub fn invalidate_uri(&self, uri: &Url, app: Option<&str>) -> usize {
        let removed = {
            let Some(mut variants) = self.by_uri.get_mut(uri.as_str()) else {
                return 0;
            };
            let targets: Vec<Fingerprint> = variants
                .iter()
                .filter(|(_, scope)| match (scope.as_deref(), app) {
                    (None, _) => true,
                    (Some(scope), Some(app)) => scope == app,
                    (Some(_), None) => false,
                })
                .map(|(fingerprint, _)| fingerprint.clone())
                .collect();

            let mut removed = 0;
            for fingerprint in targets {
                variants.remove(&fingerprint);
                if self.store.remove(&fingerprint).is_some() {
                    removed += 1;
                }
            }
            removed
        };
        self.by_uri.remove_if(uri.as_str(), |_, variants| variants.is_empty());

        if removed > 0 {
            debug!(uri = %uri, removed, "invalidated cached responses");
            self.metrics.record_uri_invalidations(removed as u64);
        }
        removed
    }

    fn unindex(&self, uri: &str, fingerprint: &Fingerprint) {
        if let Some(mut variants) = self.by_uri.get_mut(uri) {
            // a concurrent store may already have written the key again
            if !self.store.contains(fingerprint) {
                variants.remove(fingerprint);
            }
        }
        self.by_uri.remove_if(uri, |_, variants| variants.is_empty());
    }

    /// Number of cached responses
    pub fn size(&self) -> usize {
        self.store.size()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    /// Drop every cached response
    pub fn clear(&self) {
        self.store.clear();
        self.by_uri.clear();
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("policy", &self.policy)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
