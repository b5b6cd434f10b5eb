//! HTTP Service
//!
//! Exposes a pipeline over HTTP:
//!
//! - `GET  /fetch?url=<uri>[&ignore_cache=true]` serve an unsigned request
//! - `POST /invalidate` body `{"app_id": "...", "uris": [...]}`
//! - `POST /invalidate/users` body `{"app_id": "...", "user_keys": [...]}`
//! - `GET  /metrics` Prometheus text format
//! - `GET  /healthz`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, FetchError, Result};
use crate::http::{normalize_uri, HttpRequest};
use crate::pipeline::{PipelineState, RequestPipeline};

/// Header reporting how a proxied response was served
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Header carrying the per-request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Largest accepted request body (invalidation payloads)
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Upstream headers not forwarded to the client
const HOP_BY_HOP: [&str; 4] = ["connection", "content-length", "transfer-encoding", "keep-alive"];

/// Shared state behind every connection
pub struct AppState {
    pipeline: Arc<RequestPipeline>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        Self {
            pipeline,
            started_at: Utc::now(),
        }
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }
}

#[derive(Debug, Deserialize)]
struct InvalidateUrisRequest {
    app_id: String,
    uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InvalidateUsersRequest {
    app_id: String,
    user_keys: Vec<String>,
}

#[derive(Debug, Serialize)]
struct InvalidateUrisResponse {
    removed: usize,
}

#[derive(Debug, Serialize)]
struct InvalidateUsersResponse {
    marker: u64,
    users: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    started_at: DateTime<Utc>,
    entries: usize,
}

// =============================================================================
// Routing
// =============================================================================

/// Route one request. `body` is the fully collected request body.
pub async fn handle(state: &AppState, method: &Method, uri: &Uri, body: Bytes) -> Response<Full<Bytes>> {
    let request_id = Uuid::new_v4();
    debug!(%request_id, %method, path = uri.path(), "request");

    let mut response = match (method, uri.path()) {
        (&Method::GET, "/fetch") => fetch(state, uri).await,
        (&Method::POST, "/invalidate") => invalidate_uris(state, &body),
        (&Method::POST, "/invalidate/users") => invalidate_users(state, &body),
        (&Method::GET, "/metrics") => metrics(state),
        (&Method::GET, "/healthz") | (&Method::GET, "/livez") => health(state),
        (_, "/fetch") | (_, "/invalidate") | (_, "/invalidate/users") | (_, "/metrics") => {
            text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn fetch(state: &AppState, uri: &Uri) -> Response<Full<Bytes>> {
    let params = query_params(uri.query().unwrap_or_default());
    let Some(target) = params.iter().find(|(k, _)| k == "url").map(|(_, v)| v.as_str()) else {
        return text(StatusCode::BAD_REQUEST, "missing 'url' parameter");
    };
    let ignore_cache = params
        .iter()
        .any(|(k, v)| k == "ignore_cache" && matches!(v.as_str(), "1" | "true" | "yes"));

    let request = match HttpRequest::get(target) {
        Ok(request) => request.ignore_cache(ignore_cache),
        Err(e) => return error_response(&e),
    };

    match state.pipeline.serve(&request).await {
        Ok(outcome) => {
            let cache_status = match outcome.state {
                PipelineState::FreshHit => "HIT",
                PipelineState::FallbackToStale => "STALE",
                _ if ignore_cache => "BYPASS",
                _ => "MISS",
            };
            let upstream = outcome.response;

            let mut response = Response::new(Full::new(upstream.body().clone()));
            *response.status_mut() =
                StatusCode::from_u16(upstream.status()).unwrap_or(StatusCode::BAD_GATEWAY);
            for (name, value) in upstream.headers() {
                if HOP_BY_HOP.contains(&name.as_str()) {
                    continue;
                }
                if let (Ok(name), Ok(value)) = (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
            response.headers_mut().insert(
                HeaderName::from_static(CACHE_STATUS_HEADER),
                HeaderValue::from_static(cache_status),
            );
            response
        }
        Err(e) => error_response(&e),
    }
}

fn invalidate_uris(state: &AppState, body: &[u8]) -> Response<Full<Bytes>> {
    let payload: InvalidateUrisRequest = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => return text(StatusCode::BAD_REQUEST, &format!("invalid body: {}", e)),
    };

    let mut uris = Vec::with_capacity(payload.uris.len());
    for raw in &payload.uris {
        match normalize_uri(raw) {
            Ok(uri) => uris.push(uri),
            Err(e) => return error_response(&e),
        }
    }

    let removed = state
        .pipeline
        .invalidate_application_resources(&uris, &payload.app_id);
    json(StatusCode::OK, &InvalidateUrisResponse { removed })
}

fn invalidate_users(state: &AppState, body: &[u8]) -> Response<Full<Bytes>> {
    let payload: InvalidateUsersRequest = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => return text(StatusCode::BAD_REQUEST, &format!("invalid body: {}", e)),
    };

    let marker = state
        .pipeline
        .invalidate_user_resources(&payload.user_keys, &payload.app_id);
    json(
        StatusCode::OK,
        &InvalidateUsersResponse {
            marker,
            users: payload.user_keys.len(),
        },
    )
}

fn metrics(state: &AppState) -> Response<Full<Bytes>> {
    let cache = state.pipeline.cache();
    match cache.metrics().snapshot().to_prometheus(cache.size()) {
        Ok(body) => {
            let mut response = text(StatusCode::OK, &body);
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(e) => error_response(&e),
    }
}

fn health(state: &AppState) -> Response<Full<Bytes>> {
    json(
        StatusCode::OK,
        &HealthResponse {
            status: "ok",
            started_at: state.started_at,
            entries: state.pipeline.cache().size(),
        },
    )
}

// =============================================================================
// Helpers
// =============================================================================

/// Decode `a=1&b=2` into pairs; keys without `=` get an empty value
fn query_params(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                let s = s.replace('+', " ");
                urlencoding::decode(&s)
                    .map(|d| d.into_owned())
                    .unwrap_or(s)
            };
            (decode(key), decode(value))
        })
        .collect()
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidUri { .. } => StatusCode::BAD_REQUEST,
        Error::Fetch(FetchError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
        Error::Fetch(FetchError::Unsupported(_)) => StatusCode::NOT_IMPLEMENTED,
        Error::Fetch(_) => StatusCode::BAD_GATEWAY,
        Error::Config(_) | Error::Io(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &Error) -> Response<Full<Bytes>> {
    let status = status_for(error);
    if status.is_server_error() {
        warn!(%error, %status, "request failed");
    }
    text(status, &error.to_string())
}

fn text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::copy_from_slice(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("serialization failed: {}", e),
        ),
    }
}

/// Collect a request body of at most [`MAX_BODY_BYTES`]
async fn read_body<B>(body: B) -> std::result::Result<Bytes, Response<Full<Bytes>>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => Err(text(
            StatusCode::PAYLOAD_TOO_LARGE,
            &format!("request body exceeds {} bytes", MAX_BODY_BYTES),
        )),
        Err(e) => Err(text(StatusCode::BAD_REQUEST, &format!("body read failed: {}", e))),
    }
}

// =============================================================================
// Server
// =============================================================================

/// Serve `state` on `addr` until `shutdown` is cancelled
pub async fn run_server(addr: &str, state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address '{}': {}", addr, e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("Cache server listening on {}", addr);

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Cache server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let state = Arc::clone(&state);
                async move {
                    let (parts, body) = req.into_parts();
                    let response = match read_body(body).await {
                        Ok(body) => handle(&state, &parts.method, &parts.uri, body).await,
                        Err(rejected) => rejected,
                    };
                    Ok::<_, Infallible>(response)
                }
            });

            let connection = http1::Builder::new().serve_connection(io, service);
            tokio::pin!(connection);

            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(e) = result {
                        error!(%peer, "Cache server connection error: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    connection.as_mut().graceful_shutdown();
                    if let Err(e) = connection.await {
                        debug!(%peer, "connection closed during shutdown: {}", e);
                    }
                }
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
