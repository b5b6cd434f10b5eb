//! Top-level configuration
//!
//! Groups the per-component configs and wires a pipeline from them.

use std::sync::Arc;

use crate::adapters::FetcherConfig;
use crate::cache::{CacheConfig, CacheMetrics, FreshnessPolicy, ResponseCache};
use crate::domain::{Clock, Fetcher};
use crate::error::Result;
use crate::invalidation::InvalidationRegistry;
use crate::pipeline::{PipelineConfig, RequestPipeline};

/// Full configuration for one cache instance
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Response cache and marker table sizing
    pub cache: CacheConfig,
    /// Admission and TTL rules
    pub freshness: FreshnessPolicy,
    /// Fetch timeout and fallback rules
    pub pipeline: PipelineConfig,
    /// Upstream HTTP client
    pub fetcher: FetcherConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }

    /// Construct the cache, registry and pipeline described by this config
    pub fn build_pipeline(
        &self,
        fetcher: Arc<dyn Fetcher>,
        signer: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<RequestPipeline> {
        self.validate()?;

        let metrics = Arc::new(CacheMetrics::new());
        let cache = Arc::new(ResponseCache::with_policy(
            &self.cache.responses,
            self.freshness.clone(),
            metrics,
        )?);
        let registry = Arc::new(InvalidationRegistry::new(&self.cache.markers, cache)?);

        RequestPipeline::new(self.pipeline.clone(), registry, fetcher, signer, clock)
    }
}
