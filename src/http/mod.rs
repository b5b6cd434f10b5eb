//! HTTP request/response model
//!
//! Transport-independent types shared by the cache, the invalidation registry
//! and the pipeline. Fetchers translate these to and from their wire client.

pub mod cache_control;
mod fingerprint;
mod request;
mod response;

pub use cache_control::{CacheControl, CacheDirective};
pub use fingerprint::Fingerprint;
pub use request::{normalize_uri, AuthType, HttpRequest, SecurityToken, SigningArgs};
pub use response::{HttpResponse, HttpResponseBuilder, CACHE_CONTROL, EXPIRES, PRAGMA};
