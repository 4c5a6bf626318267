//! # trendmap
//!
//! Keeps a per-state "top trending search" snapshot for all 50 US states.
//!
//! A refresh cycle fetches one syndication feed per state under a
//! concurrency ceiling, retries each feed a bounded number of times, and
//! writes the complete result to a single JSON record on disk. Readers only
//! ever load that record and are told how old it is.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use trendmap::cache::CacheStore;
//! use trendmap::feed::{FeedEndpoint, FeedFetcher, FetchPolicy, HttpFeedSource};
//! use trendmap::refresh::BatchRefresher;
//! use trendmap::regions::RegionRegistry;
//! use trendmap::trigger::RefreshTrigger;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = HttpFeedSource::new(&FeedEndpoint::default(), Duration::from_secs(5))?;
//!     let refresher = BatchRefresher::new(FeedFetcher::new(source, FetchPolicy::default()), 10);
//!     let trigger = RefreshTrigger::new(
//!         Arc::new(RegionRegistry::us_states()),
//!         refresher,
//!         CacheStore::new("trends_cache.json"),
//!     );
//!     let ack = trigger.run().await?;
//!     println!("{} regions, {} without data", ack.regions, ack.no_data);
//!     Ok(())
//! }
//! ```

// ── Refresh pipeline ──────────────────────────────────────────────────────────
pub mod cache;
pub mod feed;
pub mod refresh;
pub mod regions;
pub mod trends;
pub mod trigger;

// ── Serving and scheduling ────────────────────────────────────────────────────
pub mod api;
pub mod background;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod security;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheError, CacheLookup, CacheRecord, CacheStore, Freshness, StalePolicy};
pub use config::{Config, ConfigError};
pub use feed::{FeedFetcher, FeedSource, FetchError, FetchPolicy, HttpFeedSource};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use refresh::{BatchRefresher, RefreshError};
pub use regions::{RegionCode, RegionRegistry};
pub use server::{Server, ServerError};
pub use trends::{NO_DATA, TrendLabel, TrendSnapshot};
pub use trigger::{RefreshAck, RefreshTrigger, TriggerError};
