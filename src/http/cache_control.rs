//! `Cache-Control` parsing
//!
//! Only the response directives that influence whether and for how long a
//! response may be stored are modeled. Unknown directives are kept as
//! extensions so nothing is silently dropped.

/// Individual directive from a `Cache-Control` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDirective {
    Public,
    Private,
    /// Must not be stored at all
    NoStore,
    /// May be stored but must be revalidated before every use
    NoCache,
    MaxAge(u64),
    SMaxAge(u64),
    MustRevalidate,
    Immutable,
    Extension(String, Option<String>),
}

impl CacheDirective {
    /// Parse a single directive; returns `None` for empty or malformed input
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return None;
        }

        if let Some((key, value)) = s.split_once('=') {
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            return match key {
                "max-age" => value.parse().ok().map(CacheDirective::MaxAge),
                "s-maxage" => value.parse().ok().map(CacheDirective::SMaxAge),
                // `no-cache="field"` still forbids reuse without revalidation
                "no-cache" => Some(CacheDirective::NoCache),
                _ => Some(CacheDirective::Extension(
                    key.to_string(),
                    Some(value.to_string()),
                )),
            };
        }

        match s.as_str() {
            "public" => Some(CacheDirective::Public),
            "private" => Some(CacheDirective::Private),
            "no-store" => Some(CacheDirective::NoStore),
            "no-cache" => Some(CacheDirective::NoCache),
            "must-revalidate" => Some(CacheDirective::MustRevalidate),
            "immutable" => Some(CacheDirective::Immutable),
            _ => Some(CacheDirective::Extension(s, None)),
        }
    }
}

/// Parsed `Cache-Control` header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    directives: Vec<CacheDirective>,
}

impl CacheControl {
    /// Parse a comma-separated header value
    pub fn parse(header: &str) -> Self {
        Self {
            directives: header.split(',').filter_map(CacheDirective::parse).collect(),
        }
    }

    pub fn directives(&self) -> &[CacheDirective] {
        &self.directives
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub fn no_store(&self) -> bool {
        self.directives.contains(&CacheDirective::NoStore)
    }

    pub fn no_cache(&self) -> bool {
        self.directives.contains(&CacheDirective::NoCache)
    }

    /// `max-age` in seconds; the first occurrence wins
    pub fn max_age(&self) -> Option<u64> {
        self.directives.iter().find_map(|d| match d {
            CacheDirective::MaxAge(secs) => Some(*secs),
            _ => None,
        })
    }

    /// `s-maxage` in seconds; overrides `max-age` for shared caches
    pub fn s_maxage(&self) -> Option<u64> {
        self.directives.iter().find_map(|d| match d {
            CacheDirective::SMaxAge(secs) => Some(*secs),
            _ => None,
        })
    }

    /// Lifetime for a shared cache: `s-maxage`, else `max-age`
    pub fn shared_max_age(&self) -> Option<u64> {
        self.s_maxage().or_else(|| self.max_age())
    }
}
