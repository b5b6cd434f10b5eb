//! Cache Entry Types
//!
//! Immutable stored form of a response. A stale entry is replaced wholesale,
//! never edited in place.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::http::{Fingerprint, HttpResponse};

/// A stored response with its freshness window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    key: Fingerprint,
    status: u16,
    value: Bytes,
    metadata: BTreeMap<String, String>,
    stored_at: DateTime<Utc>,
    /// `None` means the entry never expires by TTL
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Capture `response` as stored at `stored_at`
    pub fn new(
        key: Fingerprint,
        response: &HttpResponse,
        stored_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key,
            status: response.status(),
            value: response.body().clone(),
            metadata: response.headers().clone(),
            stored_at,
            expires_at,
        }
    }

    pub fn key(&self) -> &Fingerprint {
        &self.key
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Stored body (zero-copy)
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Stored headers (lowercased names)
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn stored_at(&self) -> DateTime<Utc> {
        self.stored_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Body size in bytes
    pub fn size(&self) -> u64 {
        self.value.len() as u64
    }

    /// Expired once `now` reaches `expires_at`
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Rebuild the response as it was stored
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse::from_parts(self.status, self.metadata.clone(), self.value.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
