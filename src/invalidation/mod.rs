//! Invalidation
//!
//! Per-principal invalidation markers and the registry that applies them.

mod marker;
mod registry;

pub use marker::{InvalidationMark, Principal, PrincipalKey, MARKER_HEADER, MARKER_KEY_PREFIX};
pub use registry::InvalidationRegistry;
