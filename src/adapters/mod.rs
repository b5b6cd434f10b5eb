//! Infrastructure Adapters
//!
//! Adapter implementations for the domain ports, following the Port/Adapter
//! (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │                  Fetcher  │  Clock                          │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │        ReqwestFetcher  │  UnsupportedSigner                 │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use pipecache::adapters::{FetcherConfig, ReqwestFetcher};
//! use pipecache::domain::Fetcher;
//!
//! let fetcher = ReqwestFetcher::new(FetcherConfig::default())?;
//! let response = fetcher.fetch(&request).await?;
//! ```

mod http_fetcher;

pub use http_fetcher::{FetcherConfig, ReqwestFetcher, UnsupportedSigner};
