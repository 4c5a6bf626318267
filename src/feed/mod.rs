//! Feed fetching: one region's top trend, with bounded fixed-interval retry.
//!
//! A [`FeedSource`] performs a single attempt. [`FeedFetcher`] wraps a source
//! with the retry policy: up to `attempts` tries, each bounded by `timeout`,
//! separated by a fixed `backoff` wait. Failure is folded into the
//! [`NO_DATA`](crate::trends::NO_DATA) label so one region can never abort a
//! batch.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use trendmap::feed::{FeedEndpoint, FeedFetcher, FetchPolicy, HttpFeedSource};
//! use trendmap::regions::RegionRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = HttpFeedSource::new(&FeedEndpoint::default(), Duration::from_secs(5))?;
//! let fetcher = FeedFetcher::new(source, FetchPolicy::default());
//! let registry = RegionRegistry::us_states();
//! let label = fetcher.fetch(registry.parse("CA").unwrap()).await;
//! println!("CA: {label}");
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::regions::RegionCode;
use crate::trends::TrendLabel;

pub mod http;
pub mod parse;

pub use http::{FeedEndpoint, HttpFeedSource};

/// Why a single fetch attempt failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("feed endpoint returned HTTP {0}")]
    Status(u16),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed feed: {0}")]
    Malformed(String),

    #[error("feed contained no entries")]
    EmptyFeed,

    #[error("feed source misconfigured: {0}")]
    Config(String),
}

/// One attempt at retrieving a region's top entry title.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches and parses the region's feed, returning the first entry's title.
    async fn top_title(&self, region: &RegionCode) -> Result<String, FetchError>;
}

/// Retry policy applied per region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Applies a [`FetchPolicy`] to a [`FeedSource`].
pub struct FeedFetcher<S> {
    source: S,
    policy: FetchPolicy,
}

impl<S: FeedSource> FeedFetcher<S> {
    pub fn new(source: S, policy: FetchPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the region's label, or the sentinel when every attempt failed.
    ///
    /// Never fails.
    pub async fn fetch(&self, region: &RegionCode) -> TrendLabel {
        match self.try_fetch(region).await {
            Ok(label) => label,
            Err(err) => {
                warn!(%region, attempts = self.policy.attempts, error = %err, "all attempts failed; recording no data");
                TrendLabel::no_data()
            }
        }
    }

    /// Runs the retry loop, returning the last attempt's error if none succeed.
    ///
    /// Returns on the first successful attempt; no further attempts are made.
    /// The backoff wait happens only between attempts, never after the last.
    pub async fn try_fetch(&self, region: &RegionCode) -> Result<TrendLabel, FetchError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let outcome = match timeout(self.policy.timeout, self.source.top_title(region)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(self.policy.timeout)),
            };

            match outcome {
                Ok(title) => {
                    debug!(%region, attempt, elapsed = ?started.elapsed(), "feed fetched");
                    return Ok(TrendLabel::new(title));
                }
                Err(err) if attempt < attempts => {
                    debug!(
                        %region,
                        attempt,
                        error = %err,
                        "feed attempt failed; retrying after {:?}",
                        self.policy.backoff
                    );
                    sleep(self.policy.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted feed sources shared by unit tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::{FeedSource, FetchError};
    use crate::regions::RegionCode;

    /// What a scripted region does on every attempt.
    #[derive(Debug, Clone)]
    pub enum Script {
        Title(&'static str),
        NetworkError,
        Empty,
        /// Fail this many times, then return the title.
        FailThen(usize, &'static str),
        Hang,
        /// Panics the fetching task.
        Panic,
    }

    #[derive(Default)]
    pub struct ScriptedSource {
        scripts: HashMap<String, Script>,
        calls: Mutex<HashMap<String, usize>>,
        total: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        latency: Option<Duration>,
    }

    impl ScriptedSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, code: &str, script: Script) -> Self {
            self.scripts.insert(code.to_owned(), script);
            self
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        pub fn calls_for(&self, code: &str) -> usize {
            self.calls.lock().unwrap().get(code).copied().unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.total.load(Ordering::SeqCst)
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedSource {
        async fn top_title(&self, region: &RegionCode) -> Result<String, FetchError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(region.as_str().to_owned()).or_insert(0);
                *count += 1;
                *count
            };
            self.total.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            let script = self
                .scripts
                .get(region.as_str())
                .cloned()
                .unwrap_or(Script::Title("default"));
            let result = match script {
                Script::Title(title) => Ok(title.to_owned()),
                Script::NetworkError => Err(FetchError::Status(503)),
                Script::Empty => Err(FetchError::EmptyFeed),
                Script::FailThen(failures, title) if call > failures => Ok(title.to_owned()),
                Script::FailThen(..) => Err(FetchError::Malformed("scripted".into())),
                Script::Hang => std::future::pending().await,
                Script::Panic => panic!("scripted fetch panic for {region}"),
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Script, ScriptedSource};
    use super::*;
    use crate::regions::RegionRegistry;

    fn ca() -> RegionCode {
        RegionRegistry::us_states().parse("CA").unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_attempt_makes_one_call() {
        let fetcher = FeedFetcher::new(
            ScriptedSource::new().with("CA", Script::Title("trend-A")),
            FetchPolicy::default(),
        );
        assert_eq!(fetcher.fetch(&ca()).await.as_str(), "trend-A");
        assert_eq!(fetcher.source.calls_for("CA"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_attempt_k_stops_retrying() {
        let fetcher = FeedFetcher::new(
            ScriptedSource::new().with("CA", Script::FailThen(1, "late")),
            FetchPolicy::default(),
        );
        let started = Instant::now();
        assert_eq!(fetcher.fetch(&ca()).await.as_str(), "late");
        assert_eq!(fetcher.source.calls_for("CA"), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn three_failures_yield_sentinel_with_fixed_backoff() {
        let fetcher = FeedFetcher::new(
            ScriptedSource::new().with("CA", Script::NetworkError),
            FetchPolicy::default(),
        );
        let started = Instant::now();
        let label = fetcher.fetch(&ca()).await;
        assert!(label.is_no_data());
        assert_eq!(fetcher.source.calls_for("CA"), 3);
        // two waits between three attempts, none after the last
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn try_fetch_surfaces_last_error() {
        let fetcher = FeedFetcher::new(
            ScriptedSource::new().with("CA", Script::Empty),
            FetchPolicy::default(),
        );
        assert!(matches!(fetcher.try_fetch(&ca()).await, Err(FetchError::EmptyFeed)));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_times_out() {
        let policy = FetchPolicy {
            attempts: 2,
            backoff: Duration::from_secs(3),
            timeout: Duration::from_secs(10),
        };
        let fetcher = FeedFetcher::new(ScriptedSource::new().with("CA", Script::Hang), policy);
        let started = Instant::now();
        assert!(matches!(
            fetcher.try_fetch(&ca()).await,
            Err(FetchError::Timeout(_))
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(23));
        assert_eq!(fetcher.source.calls_for("CA"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_title_is_success_labelled_no_data() {
        let fetcher = FeedFetcher::new(
            ScriptedSource::new().with("CA", Script::Title("   ")),
            FetchPolicy::default(),
        );
        assert!(fetcher.fetch(&ca()).await.is_no_data());
        assert_eq!(fetcher.source.calls_for("CA"), 1);
    }
}
