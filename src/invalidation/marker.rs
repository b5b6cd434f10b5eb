//! Invalidation markers and principal keys

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Prefix shared by every marker key
pub const MARKER_KEY_PREFIX: &str = "INV_TOK";

/// Response header carrying the applied markers
pub const MARKER_HEADER: &str = "X-Invalidation-Marker";

/// Identity dimension a marker is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Principal {
    Owner,
    Viewer,
}

/// Marker table key for one user of one application: `INV_TOK:<app>:<user>`.
///
/// User keys may be container-qualified (`example.org:1`); only the part
/// after the last `:` is kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrincipalKey(String);

impl PrincipalKey {
    pub fn new(app_id: &str, user_key: &str) -> Self {
        let user = user_key.rsplit(':').next().unwrap_or(user_key);
        Self(format!("{}:{}:{}", MARKER_KEY_PREFIX, app_id, user))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PrincipalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Marker values in effect for a request's owner and viewer.
///
/// Serialized as `o=<n>;v=<n>;`, with a segment only for principals that
/// are signed and have a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InvalidationMark {
    pub owner: Option<u64>,
    pub viewer: Option<u64>,
}

impl InvalidationMark {
    pub fn is_empty(&self) -> bool {
        self.owner.is_none() && self.viewer.is_none()
    }

    pub fn get(&self, principal: Principal) -> Option<u64> {
        match principal {
            Principal::Owner => self.owner,
            Principal::Viewer => self.viewer,
        }
    }

    pub fn set(&mut self, principal: Principal, value: u64) {
        match principal {
            Principal::Owner => self.owner = Some(value),
            Principal::Viewer => self.viewer = Some(value),
        }
    }
}

impl fmt::Display for InvalidationMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(owner) = self.owner {
            write!(f, "o={};", owner)?;
        }
        if let Some(viewer) = self.viewer {
            write!(f, "v={};", viewer)?;
        }
        Ok(())
    }
}

impl FromStr for InvalidationMark {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut mark = InvalidationMark::default();
        for segment in s.split(';').map(str::trim).filter(|seg| !seg.is_empty()) {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| Error::Internal(format!("malformed marker segment '{}'", segment)))?;
            let value: u64 = value
                .trim()
                .parse()
                .map_err(|e| Error::Internal(format!("malformed marker value '{}': {}", value, e)))?;
            match name.trim() {
                "o" => mark.owner = Some(value),
                "v" => mark.viewer = Some(value),
                other => {
                    return Err(Error::Internal(format!("unknown marker principal '{}'", other)))
                }
            }
        }
        Ok(mark)
    }
}
