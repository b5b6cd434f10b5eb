//! Domain Layer
//!
//! Port traits the pipeline is written against.
//!
//! # Usage
//!
//! ```ignore
//! use pipecache::domain::{Clock, Fetcher, SystemClock};
//!
//! // Inject adapters into the pipeline
//! let pipeline = RequestPipeline::new(
//!     config,
//!     registry,
//!     Arc::new(ReqwestFetcher::new(FetcherConfig::default())?),
//!     Arc::new(UnsupportedSigner),
//!     Arc::new(SystemClock),
//! )?;
//! ```

pub mod ports;

pub use ports::{Clock, Fetcher, ManualClock, SystemClock};
