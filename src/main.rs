//! pipecache
//!
//! Caching HTTP front for upstream resources with URI and per-user
//! invalidation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          pipecache                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Server    │───▶│   Pipeline   │───▶│   Fetcher    │       │
//! │  │   (hyper)    │    │ cache+marks  │    │  (reqwest)   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pipecache::adapters::{FetcherConfig, ReqwestFetcher, UnsupportedSigner};
use pipecache::cache::{CacheConfig, FreshnessPolicy, StoreConfig};
use pipecache::domain::SystemClock;
use pipecache::pipeline::{FallbackPolicy, PipelineConfig};
use pipecache::server::{run_server, AppState};
use pipecache::Config;

// =============================================================================
// CLI Arguments
// =============================================================================

/// pipecache - HTTP response cache with principal-scoped invalidation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server bind address
    #[arg(long, env = "PIPECACHE_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Maximum number of cached responses
    #[arg(long, env = "PIPECACHE_CAPACITY", default_value = "10000")]
    capacity: usize,

    /// Maximum number of tracked invalidation markers
    #[arg(long, env = "PIPECACHE_MARKER_CAPACITY", default_value = "100000")]
    marker_capacity: usize,

    /// Lock shards per store (1 = exact global LRU)
    #[arg(long, env = "PIPECACHE_SHARDS", default_value = "1")]
    shards: usize,

    /// Upstream fetch timeout in seconds
    #[arg(long, env = "PIPECACHE_FETCH_TIMEOUT_SECONDS", default_value = "30")]
    fetch_timeout_seconds: u64,

    /// Upstream connect timeout in seconds
    #[arg(long, env = "PIPECACHE_CONNECT_TIMEOUT_SECONDS", default_value = "5")]
    connect_timeout_seconds: u64,

    /// Upper bound on any cached response lifetime, in seconds
    #[arg(long, env = "PIPECACHE_MAX_TTL_SECONDS")]
    max_ttl_seconds: Option<u64>,

    /// Never serve stale content when a fetch fails
    #[arg(long, env = "PIPECACHE_NO_STALE_FALLBACK")]
    no_stale_fallback: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PIPECACHE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "PIPECACHE_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn to_config(&self) -> Config {
        let fetch_timeout = Duration::from_secs(self.fetch_timeout_seconds);
        Config {
            cache: CacheConfig {
                responses: StoreConfig {
                    capacity: self.capacity,
                    shards: self.shards,
                },
                markers: StoreConfig {
                    capacity: self.marker_capacity,
                    shards: self.shards,
                },
            },
            freshness: match self.max_ttl_seconds {
                Some(secs) => FreshnessPolicy::with_max_ttl(Duration::from_secs(secs)),
                None => FreshnessPolicy::new(),
            },
            pipeline: PipelineConfig {
                fetch_timeout,
                fallback: if self.no_stale_fallback {
                    FallbackPolicy::disabled()
                } else {
                    FallbackPolicy::default()
                },
            },
            fetcher: FetcherConfig {
                connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
                request_timeout: fetch_timeout,
                ..Default::default()
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting pipecache {}", pipecache::version());
    info!("  Listen address: {}", args.listen_addr);
    info!("  Response capacity: {}", args.capacity);
    info!("  Marker capacity: {}", args.marker_capacity);
    info!("  Shards: {}", args.shards);
    info!("  Fetch timeout: {}s", args.fetch_timeout_seconds);
    info!("  Stale fallback: {}", !args.no_stale_fallback);

    let config = args.to_config();
    let fetcher = ReqwestFetcher::new(config.fetcher.clone()).context("creating upstream client")?;
    let pipeline = config
        .build_pipeline(
            Arc::new(fetcher),
            Arc::new(UnsupportedSigner),
            Arc::new(SystemClock),
        )
        .context("invalid configuration")?;

    let state = Arc::new(AppState::new(Arc::new(pipeline)));
    let shutdown = CancellationToken::new();

    let server_shutdown = shutdown.clone();
    let listen_addr = args.listen_addr.clone();
    let mut server =
        tokio::spawn(async move { run_server(&listen_addr, state, server_shutdown).await });

    let finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        result = &mut server => Some(result),
    };
    let result = match finished {
        Some(result) => result,
        None => {
            info!("Shutdown signal received");
            shutdown.cancel();
            server.await
        }
    };

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Cache server error: {}", e);
            return Err(e.into());
        }
        Err(e) => return Err(anyhow::anyhow!("server task failed: {}", e)),
    }

    info!("pipecache shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
