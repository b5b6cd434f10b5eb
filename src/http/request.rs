//! Outbound request model
//!
//! A request carries everything the pipeline needs to decide whether a cached
//! copy can be trusted: the normalized URI, the auth type, the security token
//! naming the application/owner/viewer, and which of those principals the
//! signer includes.

use std::fmt;
use std::time::Duration;

use reqwest::Method;
use url::Url;

use crate::error::{Error, Result};

/// How the request is authenticated upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthType {
    /// Plain fetch, no identity attached
    #[default]
    None,
    /// Signed fetch (identity asserted by a request signature)
    Signed,
    /// OAuth fetch (access token on behalf of a user)
    OAuth,
}

impl AuthType {
    /// Whether the request carries principal identity
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthType::None)
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::None => write!(f, "none"),
            AuthType::Signed => write!(f, "signed"),
            AuthType::OAuth => write!(f, "oauth"),
        }
    }
}

/// Identity of the caller: application plus optional owner and viewer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SecurityToken {
    pub app_id: String,
    pub owner_id: Option<String>,
    pub viewer_id: Option<String>,
}

impl SecurityToken {
    /// Token for an application with no user context
    pub fn for_app(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            owner_id: None,
            viewer_id: None,
        }
    }

    /// Set the owner id
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// Set the viewer id
    pub fn with_viewer(mut self, viewer_id: impl Into<String>) -> Self {
        self.viewer_id = Some(viewer_id.into());
        self
    }
}

/// Which principals the signer asserts, plus OAuth service coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SigningArgs {
    pub sign_owner: bool,
    pub sign_viewer: bool,
    pub service_name: Option<String>,
    pub token_name: Option<String>,
}

impl Default for SigningArgs {
    fn default() -> Self {
        Self {
            sign_owner: true,
            sign_viewer: true,
            service_name: None,
            token_name: None,
        }
    }
}

/// Normalize a raw URI: trim, default to `http`, drop the fragment.
///
/// Only `http` and `https` are accepted. Host case and default ports are
/// normalized by the URL parser.
pub fn normalize_uri(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let invalid = |reason: String| Error::InvalidUri {
        uri: raw.to_string(),
        reason,
    };

    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("http://{}", trimmed)).map_err(|e| invalid(e.to_string()))?
        }
        Err(e) => return Err(invalid(e.to_string())),
    };

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".into()));
    }

    url.set_fragment(None);
    Ok(url)
}

/// A request to be served by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: Method,
    uri: Url,
    auth_type: AuthType,
    token: Option<SecurityToken>,
    signing: SigningArgs,
    ignore_cache: bool,
    cache_ttl: Option<Duration>,
    timeout: Option<Duration>,
}

impl HttpRequest {
    /// Create a GET request for an already-normalized URI
    pub fn new(uri: Url) -> Self {
        let mut uri = uri;
        uri.set_fragment(None);
        Self {
            method: Method::GET,
            uri,
            auth_type: AuthType::None,
            token: None,
            signing: SigningArgs::default(),
            ignore_cache: false,
            cache_ttl: None,
            timeout: None,
        }
    }

    /// Parse and normalize `raw`, then create a GET request for it
    pub fn get(raw: &str) -> Result<Self> {
        Ok(Self::new(normalize_uri(raw)?))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    pub fn with_security_token(mut self, token: SecurityToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_signing(mut self, signing: SigningArgs) -> Self {
        self.signing = signing;
        self
    }

    pub fn sign_owner(mut self, sign: bool) -> Self {
        self.signing.sign_owner = sign;
        self
    }

    pub fn sign_viewer(mut self, sign: bool) -> Self {
        self.signing.sign_viewer = sign;
        self
    }

    /// Bypass the cache for both lookup and store
    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }

    /// Override the response's own freshness directives
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Override the pipeline's default fetch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn security_token(&self) -> Option<&SecurityToken> {
        self.token.as_ref()
    }

    pub fn signing(&self) -> &SigningArgs {
        &self.signing
    }

    pub fn is_ignore_cache(&self) -> bool {
        self.ignore_cache
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Only plain GETs that do not bypass the cache may be served from or
    /// written to it
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET && !self.ignore_cache
    }

    /// Owner id, if the request is authenticated and signs the owner
    pub fn signed_owner(&self) -> Option<&str> {
        if !self.auth_type.is_authenticated() || !self.signing.sign_owner {
            return None;
        }
        self.token.as_ref()?.owner_id.as_deref()
    }

    /// Viewer id, if the request is authenticated and signs the viewer
    pub fn signed_viewer(&self) -> Option<&str> {
        if !self.auth_type.is_authenticated() || !self.signing.sign_viewer {
            return None;
        }
        self.token.as_ref()?.viewer_id.as_deref()
    }

    /// Application id, if the request is authenticated
    pub fn app_id(&self) -> Option<&str> {
        if !self.auth_type.is_authenticated() {
            return None;
        }
        self.token.as_ref().map(|t| t.app_id.as_str())
    }
}
