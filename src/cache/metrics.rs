//! Cache Metrics Collection
//!
//! Counters for cache lookups, stores, invalidations and upstream fetches,
//! plus Prometheus text export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookup outcomes
    lookups: AtomicU64,
    fresh_hits: AtomicU64,
    stale_hits: AtomicU64,
    invalidated_hits: AtomicU64,
    misses: AtomicU64,

    // Admission
    stores: AtomicU64,
    not_cacheable: AtomicU64,
    evictions: AtomicU64,

    // Invalidation
    uri_invalidations: AtomicU64,
    user_invalidations: AtomicU64,

    // Upstream
    fetches: AtomicU64,
    fetch_errors: AtomicU64,
    fallbacks: AtomicU64,

    // Fetch latency (microseconds, exponential moving average)
    fetch_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    // Lookup outcomes
    pub fn record_lookup(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fresh_hit(&self) {
        self.fresh_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry found but past its TTL or marked strict no-cache
    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Entry found but predates a principal's invalidation marker
    pub fn record_invalidated_hit(&self) {
        self.invalidated_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    // Admission
    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_cacheable(&self) {
        self.not_cacheable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    // Invalidation
    pub fn record_uri_invalidations(&self, removed: u64) {
        self.uri_invalidations.fetch_add(removed, Ordering::Relaxed);
    }

    pub fn record_user_invalidations(&self, users: u64) {
        self.user_invalidations.fetch_add(users, Ordering::Relaxed);
    }

    // Upstream
    pub fn record_fetch(&self, duration: Duration) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(&self.fetch_latency_us, duration);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    fn update_latency_ema(&self, target: &AtomicU64, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1; // EMA smoothing factor

        loop {
            let current = target.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if target
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn fresh_hits(&self) -> u64 {
        self.fresh_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn fetch_latency(&self) -> Duration {
        Duration::from_micros(self.fetch_latency_us.load(Ordering::Relaxed))
    }

    /// Share of lookups answered from cache without a fetch
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.fresh_hits() as f64 / lookups as f64
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lookups: self.lookups(),
            fresh_hits: self.fresh_hits(),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            invalidated_hits: self.invalidated_hits.load(Ordering::Relaxed),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),

            stores: self.stores.load(Ordering::Relaxed),
            not_cacheable: self.not_cacheable.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),

            uri_invalidations: self.uri_invalidations.load(Ordering::Relaxed),
            user_invalidations: self.user_invalidations.load(Ordering::Relaxed),

            fetches: self.fetches(),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            fetch_latency: self.fetch_latency(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.lookups,
            &self.fresh_hits,
            &self.stale_hits,
            &self.invalidated_hits,
            &self.misses,
            &self.stores,
            &self.not_cacheable,
            &self.evictions,
            &self.uri_invalidations,
            &self.user_invalidations,
            &self.fetches,
            &self.fetch_errors,
            &self.fallbacks,
            &self.fetch_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time view of [`CacheMetrics`]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub lookups: u64,
    pub fresh_hits: u64,
    pub stale_hits: u64,
    pub invalidated_hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,

    pub stores: u64,
    pub not_cacheable: u64,
    pub evictions: u64,

    pub uri_invalidations: u64,
    pub user_invalidations: u64,

    pub fetches: u64,
    pub fetch_errors: u64,
    pub fallbacks: u64,
    pub fetch_latency: Duration,
}

impl MetricsSnapshot {
    /// Render in the Prometheus text exposition format.
    ///
    /// `entries` is the current response cache size, exported as a gauge.
    pub fn to_prometheus(&self, entries: usize) -> Result<String> {
        let registry = Registry::new_custom(Some("pipecache".to_string()), None)
            .map_err(|e| Error::Internal(format!("metrics registry: {}", e)))?;

        let counters: [(&str, &str, u64); 13] = [
            ("lookups_total", "Cache lookups", self.lookups),
            ("fresh_hits_total", "Lookups served from cache", self.fresh_hits),
            ("stale_hits_total", "Lookups that found an expired entry", self.stale_hits),
            (
                "invalidated_hits_total",
                "Lookups that found an invalidated entry",
                self.invalidated_hits,
            ),
            ("misses_total", "Lookups that found no entry", self.misses),
            ("stores_total", "Responses written to the cache", self.stores),
            (
                "not_cacheable_total",
                "Responses rejected by the admission policy",
                self.not_cacheable,
            ),
            ("evictions_total", "Entries evicted by LRU", self.evictions),
            (
                "uri_invalidations_total",
                "Entries removed by URI invalidation",
                self.uri_invalidations,
            ),
            (
                "user_invalidations_total",
                "User markers written",
                self.user_invalidations,
            ),
            ("fetches_total", "Upstream fetches", self.fetches),
            ("fetch_errors_total", "Failed upstream fetches", self.fetch_errors),
            ("fallbacks_total", "Stale responses served after a failed fetch", self.fallbacks),
        ];

        for (name, help, value) in counters {
            let counter = IntCounter::with_opts(Opts::new(name, help))
                .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
            counter.inc_by(value);
            registry
                .register(Box::new(counter))
                .map_err(|e| Error::Internal(format!("metric {}: {}", name, e)))?;
        }

        let gauge = IntGauge::with_opts(Opts::new("entries", "Responses currently cached"))
            .map_err(|e| Error::Internal(format!("metric entries: {}", e)))?;
        gauge.set(entries as i64);
        registry
            .register(Box::new(gauge))
            .map_err(|e| Error::Internal(format!("metric entries: {}", e)))?;

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))
    }
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
