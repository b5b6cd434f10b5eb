//! Request pipeline module
//!
//! Cache-aware request execution with invalidation checks and stale
//! fallback.

mod engine;

pub use engine::{
    FallbackPolicy, PipelineConfig, PipelineOutcome, PipelineState, RequestPipeline,
    DEFAULT_FETCH_TIMEOUT,
};
