//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions the pipeline depends on. Adapters implement these traits to
//! provide the upstream transport, the signing transport and the clock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Pipeline Layer                          │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │          Fetcher (plain / signing)  │  Clock         │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │   ReqwestFetcher │ UnsupportedSigner │ SystemClock   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::FetchError;
use crate::http::{HttpRequest, HttpResponse};

// =============================================================================
// Fetch Port
// =============================================================================

/// Port for retrieving a response from upstream.
///
/// Used for both fetch strategies: the plain fetcher serves unauthenticated
/// requests, the signing fetcher serves `Signed` and `OAuth` requests. Both
/// report failures as [`FetchError`] values. The pipeline wraps every call in
/// a timeout, so implementations need not enforce one themselves.
///
/// # Example
///
/// ```ignore
/// struct StaticFetcher(HttpResponse);
///
/// #[async_trait]
/// impl Fetcher for StaticFetcher {
///     async fn fetch(&self, _request: &HttpRequest) -> Result<HttpResponse, FetchError> {
///         Ok(self.0.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the resource named by `request`.
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError>;

    /// Name used in logs and metrics.
    fn name(&self) -> &str {
        "fetcher"
    }
}

// =============================================================================
// Clock Port
// =============================================================================

/// Source of wall-clock time for freshness decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        *self.now.write() += delta;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::default())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
