//! pipecache Integration Tests
//!
//! End-to-end scenarios through the public API:
//! - Request pipeline: fetcher selection, caching, bypass
//! - Invalidation: lazy per-user markers vs eager URI eviction
//! - Resilience: stale fallback, timeouts, cancellation
//! - Concurrency: shared cache under parallel load

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use pipecache::cache::{CacheMetrics, ResponseCache, StoreConfig};
use pipecache::domain::{Fetcher, ManualClock};
use pipecache::http::{AuthType, HttpRequest, HttpResponse, HttpResponseBuilder, SecurityToken};
use pipecache::invalidation::{InvalidationRegistry, MARKER_HEADER};
use pipecache::pipeline::{PipelineConfig, PipelineState, RequestPipeline};
use pipecache::FetchError;

// =============================================================================
// Test Fixtures
// =============================================================================

const DEFAULT_URI: &str = "http://example.org/gadget.xml";

/// Returns the configured result on every call and remembers the last request
#[derive(Default)]
struct FakeFetcher {
    response: Mutex<Option<Result<HttpResponse, FetchError>>>,
    last_request: Mutex<Option<HttpRequest>>,
    fetch_count: AtomicUsize,
}

impl FakeFetcher {
    fn respond(&self, response: HttpResponse) {
        *self.response.lock() = Some(Ok(response));
    }

    fn fail(&self, error: FetchError) {
        *self.response.lock() = Some(Err(error));
    }

    fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> Option<HttpRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());
        self.response
            .lock()
            .clone()
            .unwrap_or_else(|| Err(FetchError::Transport("no response configured".into())))
    }
}

/// Signals when a fetch starts, then blocks until released
struct GatedFetcher {
    entered: tokio::sync::Notify,
    gate: tokio::sync::Notify,
    response: Mutex<HttpResponse>,
    fetch_count: AtomicUsize,
}

impl GatedFetcher {
    fn new(response: HttpResponse) -> Self {
        Self {
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
            response: Mutex::new(response),
            fetch_count: AtomicUsize::new(0),
        }
    }

    fn respond(&self, response: HttpResponse) {
        *self.response.lock() = response;
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, _request: &HttpRequest) -> Result<HttpResponse, FetchError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.gate.notified().await;
        Ok(self.response.lock().clone())
    }
}

struct Harness {
    pipeline: Arc<RequestPipeline>,
    fetcher: Arc<FakeFetcher>,
    oauth: Arc<FakeFetcher>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_fetchers(Arc::new(FakeFetcher::default()), Arc::new(FakeFetcher::default()))
    }

    fn with_fetchers(fetcher: Arc<FakeFetcher>, oauth: Arc<FakeFetcher>) -> Self {
        let clock = Arc::new(ManualClock::default());
        let pipeline = build_pipeline(fetcher.clone(), oauth.clone(), clock.clone(), 16);
        Self {
            pipeline: Arc::new(pipeline),
            fetcher,
            oauth,
            clock,
        }
    }

    fn cache_size(&self) -> usize {
        self.pipeline.cache().size()
    }
}

fn build_pipeline(
    fetcher: Arc<dyn Fetcher>,
    signer: Arc<dyn Fetcher>,
    clock: Arc<ManualClock>,
    capacity: usize,
) -> RequestPipeline {
    let cache = Arc::new(
        ResponseCache::new(&StoreConfig::exact(capacity), Arc::new(CacheMetrics::new())).unwrap(),
    );
    let registry = Arc::new(InvalidationRegistry::new(&StoreConfig::exact(64), cache).unwrap());
    RequestPipeline::new(PipelineConfig::default(), registry, fetcher, signer, clock).unwrap()
}

fn cacheable(body: &str) -> HttpResponse {
    HttpResponseBuilder::new().body_str(body).max_age(1000).build()
}

fn plain_request() -> HttpRequest {
    HttpRequest::get(DEFAULT_URI).unwrap()
}

fn signed_request(sign_owner: bool, sign_viewer: bool) -> HttpRequest {
    plain_request()
        .with_auth_type(AuthType::Signed)
        .with_security_token(
            SecurityToken::for_app("AppX")
                .with_owner("OwnerX")
                .with_viewer("ViewerX"),
        )
        .sign_owner(sign_owner)
        .sign_viewer(sign_viewer)
}

// =============================================================================
// Request Pipeline
// =============================================================================

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_auth_type_none_not_cached() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("response"));

        let outcome = h.pipeline.serve(&plain_request()).await.unwrap();

        assert_eq!(outcome.response.body_str(), "response");
        assert_eq!(h.fetcher.last_request(), Some(plain_request()));
        assert!(outcome.stored);
        assert_eq!(h.cache_size(), 1);
        assert_eq!(h.fetcher.fetch_count(), 1);
        assert_eq!(h.oauth.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_auth_type_none_was_cached() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("cached"));
        h.pipeline.execute(&plain_request()).await.unwrap();

        h.fetcher.respond(cacheable("should not be fetched"));
        let outcome = h.pipeline.serve(&plain_request()).await.unwrap();

        assert!(outcome.is_cache_hit());
        assert_eq!(outcome.response.body_str(), "cached");
        assert_eq!(h.fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_auth_type_none_was_cached_but_stale() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("cached"));
        h.pipeline.execute(&plain_request()).await.unwrap();

        h.clock.advance(Duration::from_secs(1001));
        h.fetcher.respond(cacheable("fetched"));
        let response = h.pipeline.execute(&plain_request()).await.unwrap();

        assert_eq!(response.body_str(), "fetched");
        assert_eq!(h.fetcher.fetch_count(), 2);
        assert_eq!(h.cache_size(), 1);

        // the refetched copy replaced the stale one
        let again = h.pipeline.serve(&plain_request()).await.unwrap();
        assert!(again.is_cache_hit());
        assert_eq!(again.response.body_str(), "fetched");
    }

    #[tokio::test]
    async fn test_strict_no_cache_is_always_refetched() {
        let h = Harness::new();
        h.fetcher.respond(
            HttpResponseBuilder::from_response(&cacheable("first"))
                .header("Pragma", "no-cache")
                .build(),
        );
        h.pipeline.execute(&plain_request()).await.unwrap();
        assert_eq!(h.cache_size(), 1);

        h.pipeline.execute(&plain_request()).await.unwrap();
        assert_eq!(h.fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_auth_type_none_ignore_cache() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("fetched"));

        let response = h
            .pipeline
            .execute(&plain_request().ignore_cache(true))
            .await
            .unwrap();

        assert_eq!(response.body_str(), "fetched");
        assert_eq!(h.fetcher.fetch_count(), 1);
        assert_eq!(h.cache_size(), 0);

        let metrics = h.pipeline.cache().metrics().snapshot();
        assert_eq!(metrics.lookups, 0);
        assert_eq!(metrics.stores, 0);
    }

    #[tokio::test]
    async fn test_auth_type_oauth_not_cached() {
        let h = Harness::new();
        h.oauth.respond(cacheable("oauth result"));
        let request = signed_request(true, true).with_auth_type(AuthType::OAuth);

        let response = h.pipeline.execute(&request).await.unwrap();

        assert_eq!(response.body_str(), "oauth result");
        assert_eq!(h.oauth.last_request(), Some(request));
        assert_eq!(h.oauth.fetch_count(), 1);
        assert_eq!(h.fetcher.fetch_count(), 0);
        assert_eq!(h.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_auth_type_oauth_was_cached() {
        let h = Harness::new();
        let request = signed_request(true, true).with_auth_type(AuthType::OAuth);
        h.oauth.respond(cacheable("cached"));
        h.pipeline.execute(&request).await.unwrap();

        let outcome = h.pipeline.serve(&request).await.unwrap();

        assert!(outcome.is_cache_hit());
        assert_eq!(outcome.response.body_str(), "cached");
        assert_eq!(h.oauth.fetch_count(), 1);
        assert_eq!(h.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_signed_and_plain_variants_are_distinct() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("plain"));
        h.oauth.respond(cacheable("signed"));

        h.pipeline.execute(&plain_request()).await.unwrap();
        h.pipeline.execute(&signed_request(true, true)).await.unwrap();

        assert_eq!(h.cache_size(), 2);
        let plain = h.pipeline.execute(&plain_request()).await.unwrap();
        let signed = h.pipeline.execute(&signed_request(true, true)).await.unwrap();
        assert_eq!(plain.body_str(), "plain");
        assert_eq!(signed.body_str(), "signed");
    }

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let h = Harness::new();
        let body: Vec<u8> = (0..=255u8).collect();
        let original = HttpResponseBuilder::new()
            .body(body.clone())
            .max_age(1000)
            .header("Content-Type", "application/octet-stream")
            .build();
        h.fetcher.respond(original.clone());

        h.pipeline.execute(&plain_request()).await.unwrap();
        let cached = h.pipeline.serve(&plain_request()).await.unwrap();

        assert!(cached.is_cache_hit());
        assert_eq!(cached.response, original);
        assert_eq!(cached.response.body().as_ref(), body.as_slice());
    }
}

// =============================================================================
// Invalidation
// =============================================================================

mod invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_user_invalidation_is_lazy() {
        let h = Harness::new();
        let request = signed_request(true, true);
        h.oauth.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&request).await.unwrap();
        assert_eq!(h.cache_size(), 1);

        h.pipeline.invalidate_user_resources(["example.org:OwnerX"], "AppX");
        assert_eq!(h.cache_size(), 1);

        h.oauth.respond(cacheable("NEWCONTENT"));
        let response = h.pipeline.execute(&request).await.unwrap();
        assert_eq!(response.body_str(), "NEWCONTENT");
        assert_eq!(h.oauth.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_uri_invalidation_is_eager() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&plain_request()).await.unwrap();
        assert_eq!(h.cache_size(), 1);

        let removed = h
            .pipeline
            .invalidate_application_resources(&[plain_request().uri().clone()], "AppX");

        assert_eq!(removed, 1);
        assert_eq!(h.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_uri_invalidation_spares_other_applications() {
        let h = Harness::new();
        h.oauth.respond(cacheable("for AppX"));
        h.pipeline.execute(&signed_request(true, false)).await.unwrap();

        let removed = h
            .pipeline
            .invalidate_application_resources(&[plain_request().uri().clone()], "AppY");

        assert_eq!(removed, 0);
        assert_eq!(h.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_signed_owner_invalidation() {
        let h = Harness::new();
        let request = signed_request(true, false);
        h.oauth.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&request).await.unwrap();

        h.pipeline.invalidate_user_resources(["example.org:OwnerX"], "AppX");
        h.oauth.respond(cacheable("NEWCONTENT1"));
        let response = h.pipeline.execute(&request).await.unwrap();
        assert_eq!(response.body_str(), "NEWCONTENT1");
        assert_eq!(response.header(MARKER_HEADER), Some("o=1;"));

        // viewer is not signed, so its marker does not apply
        h.pipeline.invalidate_user_resources(["example.org:ViewerX"], "AppX");
        h.oauth.respond(cacheable("NEWCONTENT2"));
        let response = h.pipeline.execute(&request).await.unwrap();
        assert_eq!(response.body_str(), "NEWCONTENT1");
        assert_eq!(response.header(MARKER_HEADER), Some("o=1;"));
        assert_eq!(h.oauth.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_signed_viewer_invalidation() {
        let h = Harness::new();
        let request = signed_request(false, true);
        h.oauth.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&request).await.unwrap();

        h.pipeline.invalidate_user_resources(["example.org:OwnerX"], "AppX");
        h.oauth.respond(cacheable("NEWCONTENT1"));
        let response = h.pipeline.execute(&request).await.unwrap();
        assert_eq!(response.body_str(), "ORIGINALCONTENT");
        assert_eq!(response.header(MARKER_HEADER), None);

        h.pipeline.invalidate_user_resources(["example.org:ViewerX"], "AppX");
        h.oauth.respond(cacheable("NEWCONTENT2"));
        let response = h.pipeline.execute(&request).await.unwrap();
        assert_eq!(response.body_str(), "NEWCONTENT2");
        assert_eq!(response.header(MARKER_HEADER), Some("v=2;"));
    }

    #[tokio::test]
    async fn test_signed_owner_and_viewer_marker_ordering() {
        let h = Harness::new();
        let request = signed_request(true, true);
        h.oauth.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&request).await.unwrap();

        h.pipeline.invalidate_user_resources(["example.org:OwnerX"], "AppX");
        h.oauth.respond(cacheable("NEWCONTENT1"));
        let response = h.pipeline.execute(&request).await.unwrap();
        assert_eq!(response.body_str(), "NEWCONTENT1");
        assert_eq!(response.header(MARKER_HEADER), Some("o=1;"));

        h.pipeline.invalidate_user_resources(["example.org:ViewerX"], "AppX");
        h.oauth.respond(cacheable("NEWCONTENT2"));
        let response = h.pipeline.execute(&request).await.unwrap();
        assert_eq!(response.body_str(), "NEWCONTENT2");
        assert_eq!(response.header(MARKER_HEADER), Some("o=1;v=2;"));

        // fresh hit carries the same markers
        let cached = h.pipeline.serve(&request).await.unwrap();
        assert!(cached.is_cache_hit());
        assert_eq!(cached.response.header(MARKER_HEADER), Some("o=1;v=2;"));
        assert_eq!(h.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_other_application_markers_do_not_apply() {
        let h = Harness::new();
        let request = signed_request(true, true);
        h.oauth.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&request).await.unwrap();

        h.pipeline.invalidate_user_resources(["example.org:OwnerX"], "AppY");
        let outcome = h.pipeline.serve(&request).await.unwrap();

        assert!(outcome.is_cache_hit());
        assert_eq!(outcome.response.header(MARKER_HEADER), None);
    }
}

mod inflight_invalidation_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalidation_during_fetch_is_not_lost() {
        let gated = Arc::new(GatedFetcher::new(cacheable("PRE-INVALIDATION")));
        let pipeline = Arc::new(build_pipeline(
            gated.clone(),
            gated.clone(),
            Arc::new(ManualClock::default()),
            16,
        ));
        let request = signed_request(true, true);

        let task = {
            let pipeline = Arc::clone(&pipeline);
            let request = request.clone();
            tokio::spawn(async move { pipeline.execute(&request).await })
        };

        // invalidate while the first fetch is in flight
        gated.entered.notified().await;
        pipeline.invalidate_user_resources(["example.org:OwnerX"], "AppX");
        gated.gate.notify_one();
        let first = task.await.unwrap().unwrap();
        assert_eq!(first.body_str(), "PRE-INVALIDATION");

        gated.respond(cacheable("POST-INVALIDATION"));
        gated.gate.notify_one();
        let outcome = pipeline.serve(&request).await.unwrap();

        assert!(!outcome.is_cache_hit());
        assert_eq!(outcome.response.body_str(), "POST-INVALIDATION");
        assert_eq!(outcome.response.header(MARKER_HEADER), Some("o=1;"));
        assert_eq!(gated.fetch_count.load(Ordering::SeqCst), 2);
    }
}

// =============================================================================
// Resilience
// =============================================================================

mod resilience_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalidated_content_served_on_fetch_error_status() {
        let h = Harness::new();
        let request = signed_request(true, false);
        h.oauth.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&request).await.unwrap();

        h.pipeline
            .invalidate_user_resources(["example.org:OwnerX"], "AppX");
        h.oauth.respond(HttpResponse::error());

        let outcome = h.pipeline.serve(&request).await.unwrap();
        assert_eq!(outcome.state, PipelineState::FallbackToStale);
        assert_eq!(outcome.response.body_str(), "ORIGINALCONTENT");
        assert_eq!(h.cache_size(), 1);
    }

    #[tokio::test]
    async fn test_expired_content_served_on_transport_error() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("ORIGINALCONTENT"));
        h.pipeline.execute(&plain_request()).await.unwrap();

        h.clock.advance(Duration::from_secs(2000));
        h.fetcher.fail(FetchError::Transport("connection reset".into()));

        let outcome = h.pipeline.serve(&plain_request()).await.unwrap();
        assert!(outcome.is_degraded());
        assert_eq!(outcome.response.body_str(), "ORIGINALCONTENT");
        assert_eq!(h.pipeline.cache().metrics().snapshot().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_transport_error_without_cache_is_error() {
        let h = Harness::new();
        h.fetcher.fail(FetchError::Transport("connection refused".into()));

        let err = h.pipeline.execute(&plain_request()).await.unwrap_err();
        assert!(matches!(
            err,
            pipecache::Error::Fetch(FetchError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_error_is_not_cached() {
        let h = Harness::new();
        h.fetcher.respond(
            HttpResponseBuilder::from_response(&cacheable("oops"))
                .status(503)
                .build(),
        );

        let response = h.pipeline.execute(&plain_request()).await.unwrap();
        assert_eq!(response.status(), 503);
        assert_eq!(h.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_timeout_without_cache_is_error() {
        let gated = Arc::new(GatedFetcher::new(cacheable("late")));
        let pipeline = build_pipeline(
            gated.clone(),
            gated,
            Arc::new(ManualClock::default()),
            4,
        );

        let request = plain_request().with_timeout(Duration::from_millis(25));
        let err = pipeline.execute(&request).await.unwrap_err();

        assert!(matches!(
            err,
            pipecache::Error::Fetch(FetchError::Timeout(_))
        ));
        assert!(pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_never_stores() {
        let gated = Arc::new(GatedFetcher::new(cacheable("late")));
        let pipeline = Arc::new(build_pipeline(
            gated.clone(),
            gated.clone(),
            Arc::new(ManualClock::default()),
            4,
        ));

        let task = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.execute(&plain_request()).await })
        };
        tokio::task::yield_now().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        // releasing the fetch after cancellation must not populate the cache
        gated.gate.notify_waiters();
        tokio::task::yield_now().await;
        assert!(pipeline.cache().is_empty());
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency_tests {
    use super::*;
    use pipecache::cache::CacheStore;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_requests_share_cache() {
        let h = Harness::new();
        h.fetcher.respond(cacheable("shared"));
        h.pipeline.execute(&plain_request()).await.unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pipeline = Arc::clone(&h.pipeline);
                tokio::spawn(async move { pipeline.execute(&plain_request()).await })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap().body_str(), "shared");
        }
        assert_eq!(h.fetcher.fetch_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_holds_under_parallel_writers() {
        let store = Arc::new(
            CacheStore::new(&StoreConfig {
                capacity: 50,
                shards: 8,
            })
            .unwrap(),
        );

        let tasks: Vec<_> = (0..8)
            .map(|writer| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for i in 0..500 {
                        store.put(format!("{}-{}", writer, i), i);
                        assert!(store.size() <= 50);
                    }
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }
        assert!(store.size() <= store.capacity());
        assert!(store.evictions() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_user_invalidations_draw_distinct_markers() {
        let h = Harness::new();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let pipeline = Arc::clone(&h.pipeline);
                tokio::spawn(async move {
                    pipeline.invalidate_user_resources([format!("user{}", i)], "AppX")
                })
            })
            .collect();

        let mut markers: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        markers.sort_unstable();

        assert_eq!(markers, (1..=16).collect::<Vec<u64>>());
        assert_eq!(h.pipeline.registry().last_marker(), 16);
    }
}
