//! Request Pipeline Engine
//!
//! Serves one request end to end:
//!
//! 1. Bypass requests (ignore-cache or non-GET) go straight to the fetch
//!    and are never stored
//! 2. Otherwise look up the request's fingerprint
//! 3. A fresh entry that predates no invalidation marker is returned
//! 4. Anything else is refetched with the fetcher matching the auth type
//! 5. Successful fetches are stored when cacheable and annotated with the
//!    applied markers
//! 6. Failed fetches fall back to the stale entry when the policy allows

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::cache::{CachedResponseEnvelope, LatencyTracker, ResponseCache};
use crate::domain::{Clock, Fetcher};
use crate::error::{Error, FetchError, Result};
use crate::http::{AuthType, Fingerprint, HttpRequest, HttpResponse};
use crate::invalidation::{InvalidationRegistry, MARKER_HEADER};

/// Default upstream fetch timeout
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Configuration
// =============================================================================

/// Which fetch failures may be answered with a stale cached copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    /// Connection, DNS, TLS or body read failures
    pub on_transport_error: bool,
    /// Fetch exceeded its timeout
    pub on_timeout: bool,
    /// Upstream answered with status >= 400
    pub on_error_status: bool,
    /// The fetch strategy cannot serve the request
    pub on_unsupported: bool,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            on_transport_error: true,
            on_timeout: true,
            on_error_status: true,
            on_unsupported: false,
        }
    }
}

impl FallbackPolicy {
    /// Never serve stale content
    pub fn disabled() -> Self {
        Self {
            on_transport_error: false,
            on_timeout: false,
            on_error_status: false,
            on_unsupported: false,
        }
    }

    /// Whether `error` may be answered with a stale copy
    pub fn allows(&self, error: &FetchError) -> bool {
        match error {
            FetchError::Transport(_) => self.on_transport_error,
            FetchError::Timeout(_) => self.on_timeout,
            FetchError::Status(_) => self.on_error_status,
            FetchError::Unsupported(_) => self.on_unsupported,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Timeout applied to fetches that do not carry their own
    pub fetch_timeout: Duration,
    /// Stale fallback rules
    pub fallback: FallbackPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            fallback: FallbackPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout.is_zero() {
            return Err(Error::Config("fetch timeout must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Pipeline State Machine
// =============================================================================

/// States a request passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    /// Request received
    Start,
    /// Looking up the fingerprint
    CacheLookup,
    /// Served from cache
    FreshHit,
    /// Entry absent, expired or invalidated
    StaleOrMiss,
    /// Waiting on upstream
    Fetch,
    /// Upstream answered successfully
    FetchOk,
    /// Upstream failed, timed out or answered with an error status
    FetchError,
    /// Writing the response to the cache
    Store,
    /// Served a stale entry after a failed fetch
    FallbackToStale,
    /// Finished with the fetched response or an error
    Done,
}

impl PipelineState {
    /// Whether the pipeline may move from `self` to `next`
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Start, CacheLookup)
                | (Start, Fetch)
                | (CacheLookup, FreshHit)
                | (CacheLookup, StaleOrMiss)
                | (StaleOrMiss, Fetch)
                | (Fetch, FetchOk)
                | (Fetch, FetchError)
                | (FetchOk, Store)
                | (FetchOk, Done)
                | (Store, Done)
                | (FetchError, FallbackToStale)
                | (FetchError, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::FreshHit | PipelineState::FallbackToStale | PipelineState::Done
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Start => write!(f, "Start"),
            PipelineState::CacheLookup => write!(f, "CacheLookup"),
            PipelineState::FreshHit => write!(f, "FreshHit"),
            PipelineState::StaleOrMiss => write!(f, "StaleOrMiss"),
            PipelineState::Fetch => write!(f, "Fetch"),
            PipelineState::FetchOk => write!(f, "FetchOk"),
            PipelineState::FetchError => write!(f, "FetchError"),
            PipelineState::Store => write!(f, "Store"),
            PipelineState::FallbackToStale => write!(f, "FallbackToStale"),
            PipelineState::Done => write!(f, "Done"),
        }
    }
}

/// Result of serving one request
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Response handed to the caller
    pub response: HttpResponse,
    /// Terminal state
    pub state: PipelineState,
    /// Every state visited, in order
    pub steps: Vec<PipelineState>,
    /// Whether the fetched response was written to the cache
    pub stored: bool,
}

impl PipelineOutcome {
    /// Served without contacting upstream
    pub fn is_cache_hit(&self) -> bool {
        self.state == PipelineState::FreshHit
    }

    /// Served a stale copy after a failed fetch
    pub fn is_degraded(&self) -> bool {
        self.state == PipelineState::FallbackToStale
    }
}

/// Per-request state tracker
#[derive(Debug)]
struct Trace {
    steps: Vec<PipelineState>,
}

impl Trace {
    fn new() -> Self {
        Self {
            steps: vec![PipelineState::Start],
        }
    }

    fn state(&self) -> PipelineState {
        self.steps
            .last()
            .copied()
            .unwrap_or(PipelineState::Start)
    }

    fn transition(&mut self, next: PipelineState) {
        let current = self.state();
        debug_assert!(
            current.can_transition_to(next),
            "invalid pipeline transition {} -> {}",
            current,
            next
        );
        trace!(from = %current, to = %next, "pipeline transition");
        self.steps.push(next);
    }

    fn finish(self, response: HttpResponse, stored: bool) -> PipelineOutcome {
        PipelineOutcome {
            state: self.state(),
            response,
            steps: self.steps,
            stored,
        }
    }
}

// =============================================================================
// Request Pipeline
// =============================================================================

/// Cache-aware request executor
pub struct RequestPipeline {
    config: PipelineConfig,
    cache: Arc<ResponseCache>,
    registry: Arc<InvalidationRegistry>,
    fetcher: Arc<dyn Fetcher>,
    signer: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
}

impl RequestPipeline {
    /// Create a pipeline.
    ///
    /// `fetcher` serves unauthenticated requests, `signer` serves `Signed`
    /// and `OAuth` requests. The response cache is the one `registry` evicts
    /// from.
    pub fn new(
        config: PipelineConfig,
        registry: Arc<InvalidationRegistry>,
        fetcher: Arc<dyn Fetcher>,
        signer: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache: Arc::clone(registry.cache()),
            registry,
            fetcher,
            signer,
            clock,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<InvalidationRegistry> {
        &self.registry
    }

    /// Serve `request`, returning only the response
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        Ok(self.serve(request).await?.response)
    }

    /// Serve `request`, returning the response with the path it took.
    ///
    /// Dropping the returned future before it completes never writes to the
    /// cache.
    #[instrument(skip(self, request), fields(uri = %request.uri(), auth = %request.auth_type()))]
    pub async fn serve(&self, request: &HttpRequest) -> Result<PipelineOutcome> {
        let metrics = self.cache.metrics();
        let mut trace = Trace::new();
        let bypass = !request.is_cacheable();
        let fingerprint = Fingerprint::for_request(request);
        let principal_keys = self.registry.principal_keys(request);

        let cached: Option<Arc<CachedResponseEnvelope>> = if bypass {
            None
        } else {
            trace.transition(PipelineState::CacheLookup);
            metrics.record_lookup();

            match self.cache.lookup(&fingerprint) {
                None => {
                    metrics.record_miss();
                    None
                }
                Some(envelope) => {
                    let now = self.clock.now();
                    if !self.cache.is_fresh(&envelope, now) {
                        metrics.record_stale_hit();
                        Some(envelope)
                    } else if self.registry.is_invalidated(&envelope, &principal_keys) {
                        metrics.record_invalidated_hit();
                        Some(envelope)
                    } else {
                        metrics.record_fresh_hit();
                        trace.transition(PipelineState::FreshHit);
                        debug!(%fingerprint, "serving fresh cached response");
                        let response = self.annotate(request, envelope.response());
                        return Ok(trace.finish(response, false));
                    }
                }
            }
        };

        if !bypass {
            trace.transition(PipelineState::StaleOrMiss);
        }
        trace.transition(PipelineState::Fetch);

        // Markers as of fetch start; an invalidation landing mid-fetch must
        // find the stored copy stale
        let markers = self.registry.snapshot(&principal_keys);
        let fetched = self.fetch(request).await;

        match fetched {
            Ok(response) if !response.is_error() => {
                trace.transition(PipelineState::FetchOk);
                let response = response.without_header(MARKER_HEADER);

                let mut stored = false;
                if !bypass {
                    trace.transition(PipelineState::Store);
                    stored = self.cache.store(
                        fingerprint.clone(),
                        request,
                        &response,
                        markers,
                        self.clock.now(),
                    );
                    if !stored && cached.is_some() {
                        debug!(%fingerprint, "dropping superseded cached response");
                        self.cache.remove(&fingerprint);
                    }
                }

                trace.transition(PipelineState::Done);
                let response = self.annotate(request, response);
                Ok(trace.finish(response, stored))
            }
            Ok(response) => {
                trace.transition(PipelineState::FetchError);
                let error = FetchError::Status(response.status());
                metrics.record_fetch_error();

                if let Some(stale) = self.fallback(cached.as_deref(), &error) {
                    trace.transition(PipelineState::FallbackToStale);
                    return Ok(trace.finish(stale, false));
                }

                trace.transition(PipelineState::Done);
                Ok(trace.finish(response, false))
            }
            Err(error) => {
                trace.transition(PipelineState::FetchError);
                metrics.record_fetch_error();

                if let Some(stale) = self.fallback(cached.as_deref(), &error) {
                    trace.transition(PipelineState::FallbackToStale);
                    return Ok(trace.finish(stale, false));
                }

                trace.transition(PipelineState::Done);
                warn!(error = %error, kind = error.kind(), "fetch failed");
                Err(Error::Fetch(error))
            }
        }
    }

    /// Remove every cached variant of `uris` visible to `app`
    pub fn invalidate_application_resources(&self, uris: &[Url], app: &str) -> usize {
        self.registry.invalidate_resources(uris, app)
    }

    /// Mark every response cached for `user_keys` under `app` as stale
    pub fn invalidate_user_resources<I, S>(&self, user_keys: I, app: &str) -> u64
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.invalidate_user_resources(user_keys, app)
    }

    async fn fetch(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, FetchError> {
        let fetcher = match request.auth_type() {
            AuthType::None => &self.fetcher,
            AuthType::Signed | AuthType::OAuth => &self.signer,
        };
        let timeout = request.timeout().unwrap_or(self.config.fetch_timeout);

        debug!(fetcher = fetcher.name(), ?timeout, "fetching from upstream");
        let tracker = LatencyTracker::start();
        let result = match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        };
        self.cache.metrics().record_fetch(tracker.elapsed());
        result
    }

    fn fallback(
        &self,
        cached: Option<&CachedResponseEnvelope>,
        error: &FetchError,
    ) -> Option<HttpResponse> {
        let envelope = cached?;
        if !self.config.fallback.allows(error) {
            debug!(kind = error.kind(), "fallback not permitted for this failure");
            return None;
        }
        warn!(error = %error, uri = envelope.uri(), "serving stale response after failed fetch");
        self.cache.metrics().record_fallback();
        Some(envelope.response())
    }

    fn annotate(&self, request: &HttpRequest, response: HttpResponse) -> HttpResponse {
        let mark = self.registry.mark_for(request);
        if mark.is_empty() {
            response
        } else {
            response.with_header(MARKER_HEADER, mark.to_string())
        }
    }
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher.name())
            .field("signer", &self.signer.name())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
