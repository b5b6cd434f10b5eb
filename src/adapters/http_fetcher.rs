//! Upstream Fetch Adapters
//!
//! Implements the `Fetcher` port over `reqwest`, plus a signing stand-in
//! that rejects authenticated requests.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use crate::domain::Fetcher;
use crate::error::{Error, FetchError, Result};
use crate::http::{HttpRequest, HttpResponse, HttpResponseBuilder};

/// Upstream HTTP client configuration
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Overall request timeout enforced by the client
    pub request_timeout: Duration,
    /// `User-Agent` sent upstream
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            user_agent: format!("pipecache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Plain (unsigned) fetcher backed by `reqwest`
pub struct ReqwestFetcher {
    client: Client,
    config: FetcherConfig,
}

impl ReqwestFetcher {
    /// Create a new fetcher
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }
}

impl std::fmt::Debug for ReqwestFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestFetcher")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    #[instrument(skip(self, request), fields(uri = %request.uri()))]
    async fn fetch(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, FetchError> {
        let response = self
            .client
            .request(request.method().clone(), request.uri().clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        debug!(status, bytes = body.len(), "upstream responded");

        let mut builder = HttpResponseBuilder::new().status(status).body(body);
        for (name, value) in headers {
            builder = builder.header(&name, value);
        }
        Ok(builder.build())
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}

impl ReqwestFetcher {
    fn classify(&self, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.config.request_timeout)
        } else {
            FetchError::Transport(error.to_string())
        }
    }
}

/// Flatten a header map, joining repeated headers with `", "`.
/// Values that are not valid UTF-8 are dropped.
fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            continue;
        };
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

/// Signing fetcher for deployments without a signer.
///
/// Every authenticated request fails with [`FetchError::Unsupported`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSigner;

#[async_trait]
impl Fetcher for UnsupportedSigner {
    async fn fetch(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, FetchError> {
        Err(FetchError::Unsupported(format!(
            "no signer configured for {} requests",
            request.auth_type()
        )))
    }

    fn name(&self) -> &str {
        "unsupported-signer"
    }
}
