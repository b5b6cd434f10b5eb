//! pipecache - In-process HTTP response cache with principal-scoped invalidation
//!
//! Caches upstream responses by request fingerprint, expires them by their
//! cache-control directives, and invalidates them either eagerly by URI or
//! lazily per user through invalidation markers.
//!
//! # Architecture
//!
//! ```text
//! RequestPipeline → ResponseCache (lookup) → InvalidationRegistry (check)
//!                 → Fetcher / signing Fetcher (miss or stale)
//!                 → ResponseCache (store) → caller
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Infrastructure adapters implementing domain ports
//! - [`cache`] - Sharded LRU store, response cache, freshness policy, metrics
//! - [`config`] - Top-level configuration and wiring
//! - [`domain`] - Port traits (fetcher, clock)
//! - [`error`] - Error types
//! - [`http`] - Request/response model and fingerprints
//! - [`invalidation`] - Invalidation markers and registry
//! - [`pipeline`] - Request execution state machine
//! - [`server`] - HTTP surface for the `pipecache` binary

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod invalidation;
pub mod pipeline;
pub mod server;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheStore, CachedResponseEnvelope, ResponseCache, StoreConfig};
pub use config::Config;
pub use error::{Error, FetchError, Result};
pub use http::{AuthType, Fingerprint, HttpRequest, HttpResponse, HttpResponseBuilder, SecurityToken};
pub use invalidation::{InvalidationMark, InvalidationRegistry, MARKER_HEADER};
pub use pipeline::{FallbackPolicy, PipelineConfig, PipelineState, RequestPipeline};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// =============================================================================
// Tests
// =============================================================================
