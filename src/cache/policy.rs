//! Cache Admission and Freshness Policies
//!
//! Decides whether a fetched response may be stored and for how long.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::http::{HttpRequest, HttpResponse};

/// Why a response was not admitted to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotCacheableReason {
    /// The request asked to bypass the cache
    IgnoreCache,
    /// Only GET responses are cached
    Method,
    /// Upstream answered with status >= 400
    ErrorStatus(u16),
    /// `Cache-Control: no-store`
    NoStore,
    /// No `max-age`, `s-maxage`, `Expires` or TTL override
    NoFreshness,
    /// Freshness lifetime is zero or already elapsed
    ZeroTtl,
}

impl fmt::Display for NotCacheableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotCacheableReason::IgnoreCache => write!(f, "ignore-cache"),
            NotCacheableReason::Method => write!(f, "method"),
            NotCacheableReason::ErrorStatus(status) => write!(f, "status-{}", status),
            NotCacheableReason::NoStore => write!(f, "no-store"),
            NotCacheableReason::NoFreshness => write!(f, "no-freshness"),
            NotCacheableReason::ZeroTtl => write!(f, "zero-ttl"),
        }
    }
}

/// Outcome of the admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreDecision {
    /// Store, fresh until `expires_at`
    Cacheable { expires_at: DateTime<Utc> },
    /// Skip the store
    NotCacheable(NotCacheableReason),
}

impl StoreDecision {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, StoreDecision::Cacheable { .. })
    }
}

/// Freshness policy configuration
#[derive(Debug, Clone, Default)]
pub struct FreshnessPolicy {
    /// Upper bound applied to every computed lifetime
    pub max_ttl: Option<Duration>,
}

impl FreshnessPolicy {
    /// Policy that trusts upstream directives as-is
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp every lifetime to `max_ttl`
    pub fn with_max_ttl(max_ttl: Duration) -> Self {
        Self {
            max_ttl: Some(max_ttl),
        }
    }

    /// Freshness lifetime for `response` fetched for `request`.
    ///
    /// Sources in order: the request's TTL override, `s-maxage`/`max-age`,
    /// then `Expires` relative to `now`. `None` when no source applies.
    pub fn lifetime(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        let lifetime = if let Some(ttl) = request.cache_ttl() {
            ttl
        } else if let Some(secs) = response.cache_control().shared_max_age() {
            Duration::from_secs(secs)
        } else {
            let expires = response.expires()?;
            (expires - now).to_std().unwrap_or(Duration::ZERO)
        };

        Some(match self.max_ttl {
            Some(max) => lifetime.min(max),
            None => lifetime,
        })
    }

    /// Admission check for a fetched response
    pub fn decide(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
        now: DateTime<Utc>,
    ) -> StoreDecision {
        use NotCacheableReason::*;

        if request.is_ignore_cache() {
            return StoreDecision::NotCacheable(IgnoreCache);
        }
        if !request.is_cacheable() {
            return StoreDecision::NotCacheable(Method);
        }
        if response.is_error() {
            return StoreDecision::NotCacheable(ErrorStatus(response.status()));
        }
        if response.cache_control().no_store() {
            return StoreDecision::NotCacheable(NoStore);
        }

        let lifetime = match self.lifetime(request, response, now) {
            Some(lifetime) => lifetime,
            None => return StoreDecision::NotCacheable(NoFreshness),
        };
        if lifetime.is_zero() {
            return StoreDecision::NotCacheable(ZeroTtl);
        }

        match chrono::Duration::from_std(lifetime) {
            Ok(delta) => match now.checked_add_signed(delta) {
                Some(expires_at) => StoreDecision::Cacheable { expires_at },
                None => StoreDecision::Cacheable {
                    expires_at: DateTime::<Utc>::MAX_UTC,
                },
            },
            Err(_) => StoreDecision::Cacheable {
                expires_at: DateTime::<Utc>::MAX_UTC,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
