//! Response model and builder

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::cache_control::CacheControl;

pub const CACHE_CONTROL: &str = "cache-control";
pub const PRAGMA: &str = "pragma";
pub const EXPIRES: &str = "expires";

/// An upstream (or cached) response.
///
/// Header names are stored lowercased; lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl HttpResponse {
    /// `200 OK` with the given body and no headers
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Generic upstream failure (`500`, empty body)
    pub fn error() -> Self {
        Self {
            status: 500,
            headers: BTreeMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8, lossily decoded
    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Copy of this response with `name` set to `value`
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Copy of this response without `name`
    pub fn without_header(mut self, name: &str) -> Self {
        self.headers.remove(&name.to_ascii_lowercase());
        self
    }

    pub fn cache_control(&self) -> CacheControl {
        self.header(CACHE_CONTROL)
            .map(CacheControl::parse)
            .unwrap_or_default()
    }

    /// Response may be stored but must never be served without refetching
    pub fn is_strict_no_cache(&self) -> bool {
        let pragma_no_cache = self
            .header(PRAGMA)
            .map(|v| v.to_ascii_lowercase().contains("no-cache"))
            .unwrap_or(false);
        pragma_no_cache || self.cache_control().no_cache()
    }

    /// Parsed `Expires` header (RFC 2822 / IMF-fixdate)
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        let raw = self.header(EXPIRES)?;
        DateTime::parse_from_rfc2822(raw.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub(crate) fn from_parts(status: u16, headers: BTreeMap<String, String>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }
}

/// Builder for [`HttpResponse`]
#[derive(Debug, Clone, Default)]
pub struct HttpResponseBuilder {
    status: Option<u16>,
    headers: BTreeMap<String, String>,
    body: Bytes,
}

impl HttpResponseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing response
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: Some(response.status),
            headers: response.headers.clone(),
            body: response.body.clone(),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn body_str(self, body: &str) -> Self {
        self.body(Bytes::copy_from_slice(body.as_bytes()))
    }

    /// Mark the response as cacheable for `secs` seconds
    pub fn max_age(self, secs: u64) -> Self {
        self.header(CACHE_CONTROL, format!("max-age={}", secs))
    }

    /// Force revalidation on every use (`no-cache` in both headers).
    /// Existing `Cache-Control` directives are kept.
    pub fn strict_no_cache(self) -> Self {
        let cache_control = match self.headers.get(CACHE_CONTROL) {
            Some(existing) if !existing.trim().is_empty() => format!("{}, no-cache", existing),
            _ => "no-cache".to_string(),
        };
        self.header(CACHE_CONTROL, cache_control)
            .header(PRAGMA, "no-cache")
    }

    pub fn build(self) -> HttpResponse {
        HttpResponse {
            status: self.status.unwrap_or(200),
            headers: self.headers,
            body: self.body,
        }
    }
}
