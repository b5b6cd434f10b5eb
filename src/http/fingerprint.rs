//! Request fingerprints (response cache keys)

use std::fmt;

use sha2::{Digest, Sha256};

use super::request::HttpRequest;

/// Deterministic cache key derived from a request's cache-relevant identity.
///
/// Covers the method, the normalized URI, the auth type and, for
/// authenticated requests, the app id, every signed principal and the OAuth
/// service/token names. Two requests equal on those attributes always map to
/// the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn for_request(request: &HttpRequest) -> Self {
        let mut hasher = Sha256::new();
        // Length-prefixed so no value can spill into the next field
        let mut field = |label: &str, value: &str| {
            for part in [label.as_bytes(), value.as_bytes()] {
                hasher.update((part.len() as u64).to_be_bytes());
                hasher.update(part);
            }
        };

        field("method", request.method().as_str());
        field("uri", request.uri().as_str());
        field("auth", &request.auth_type().to_string());

        if request.auth_type().is_authenticated() {
            if let Some(app) = request.app_id() {
                field("app", app);
            }
            if let Some(owner) = request.signed_owner() {
                field("owner", owner);
            }
            if let Some(viewer) = request.signed_viewer() {
                field("viewer", viewer);
            }
            let signing = request.signing();
            if let Some(service) = &signing.service_name {
                field("service", service);
            }
            if let Some(token) = &signing.token_name {
                field("token", token);
            }
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
