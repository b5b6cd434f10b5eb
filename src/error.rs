//! Error types for the response cache and request pipeline

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching pipeline
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Configuration error (fatal at construction time)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream fetch failed and no stale copy could be served
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Request URI could not be parsed or normalized
    #[error("Invalid URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by a [`Fetcher`](crate::domain::Fetcher).
///
/// Fetchers return these as values; they never panic across the pipeline
/// boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The fetch did not complete within the allotted time
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// Connection, DNS, TLS or body read failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream answered with an error status
    #[error("upstream returned status {0}")]
    Status(u16),

    /// The fetch strategy cannot serve this request
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

impl FetchError {
    /// Short label used for metrics and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Transport(_) => "transport",
            FetchError::Status(_) => "status",
            FetchError::Unsupported(_) => "unsupported",
        }
    }
}
