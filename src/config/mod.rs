use std::{env, io, path::PathBuf, str::FromStr, time::Duration};

use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::cache::{DEFAULT_CACHE_FILE, DEFAULT_MAX_AGE_SECS, Freshness, StalePolicy};
use crate::feed::FetchPolicy;
use crate::feed::http::FeedEndpoint;
use crate::refresh::DEFAULT_CONCURRENCY;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub cache_path: PathBuf,
    pub freshness: Freshness,
    pub endpoint: FeedEndpoint,
    pub policy: FetchPolicy,
    pub concurrency: usize,
    pub bind_addr: String,
    pub refresh_token: Option<SecretString>,
    pub refresh_interval: Option<Duration>,
}

/// Everything in [`Config`] that is safe to log or print.
#[derive(Clone, Debug, Serialize)]
pub struct PublicConfig {
    pub cache_path: String,
    pub cache_max_age_secs: i64,
    pub stale_policy: String,
    pub feed_url: String,
    pub geo_prefix: String,
    pub fetch_attempts: u32,
    pub fetch_backoff_ms: u64,
    pub fetch_timeout_ms: u64,
    pub concurrency: usize,
    pub bind_addr: String,
    pub refresh_interval_secs: Option<u64>,
    pub has_refresh_token: bool,
}

impl Config {
    /// Reads the process environment after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; unset keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);
        let defaults = FetchPolicy::default();
        let endpoint_defaults = FeedEndpoint::default();

        Ok(Self {
            cache_path: vars
                .string("TRENDMAP_CACHE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_FILE)),
            freshness: Freshness {
                // Unsigned so the window is never negative or outside chrono's range.
                max_age: chrono::Duration::seconds(
                    vars.parse::<u32>("TRENDMAP_CACHE_MAX_AGE_SECS")?
                        .map_or(DEFAULT_MAX_AGE_SECS, i64::from),
                ),
                policy: vars
                    .parse::<StalePolicy>("TRENDMAP_STALE_POLICY")?
                    .unwrap_or_default(),
            },
            endpoint: FeedEndpoint {
                base_url: vars
                    .string("TRENDMAP_FEED_URL")
                    .unwrap_or(endpoint_defaults.base_url),
                geo_prefix: vars
                    .string("TRENDMAP_GEO_PREFIX")
                    .unwrap_or(endpoint_defaults.geo_prefix),
                user_agent: vars
                    .string("TRENDMAP_USER_AGENT")
                    .unwrap_or(endpoint_defaults.user_agent),
                accept_language: vars
                    .string("TRENDMAP_ACCEPT_LANGUAGE")
                    .unwrap_or(endpoint_defaults.accept_language),
            },
            policy: FetchPolicy {
                attempts: vars
                    .parse("TRENDMAP_FETCH_ATTEMPTS")?
                    .unwrap_or(defaults.attempts)
                    .max(1),
                backoff: vars
                    .parse("TRENDMAP_FETCH_BACKOFF_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.backoff),
                timeout: vars
                    .parse("TRENDMAP_FETCH_TIMEOUT_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.timeout),
            },
            concurrency: vars
                .parse("TRENDMAP_CONCURRENCY")?
                .unwrap_or(DEFAULT_CONCURRENCY)
                .max(1),
            bind_addr: vars
                .string("TRENDMAP_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned()),
            refresh_token: vars
                .string("TRENDMAP_REFRESH_TOKEN")
                .map(|token| SecretString::new(token.into())),
            refresh_interval: vars
                .parse("TRENDMAP_REFRESH_INTERVAL_SECS")?
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs),
        })
    }

    pub fn public_profile(&self) -> PublicConfig {
        PublicConfig {
            cache_path: self.cache_path.display().to_string(),
            cache_max_age_secs: self.freshness.max_age.num_seconds(),
            stale_policy: match self.freshness.policy {
                StalePolicy::Serve => "serve".to_owned(),
                StalePolicy::Refuse => "refuse".to_owned(),
            },
            feed_url: self.endpoint.base_url.clone(),
            geo_prefix: self.endpoint.geo_prefix.clone(),
            fetch_attempts: self.policy.attempts,
            fetch_backoff_ms: self.policy.backoff.as_millis() as u64,
            fetch_timeout_ms: self.policy.timeout.as_millis() as u64,
            concurrency: self.concurrency,
            bind_addr: self.bind_addr.clone(),
            refresh_interval_secs: self.refresh_interval.map(|d| d.as_secs()),
            has_refresh_token: self.refresh_token.is_some(),
        }
    }
}

// Blank values count as unset.
struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.string(key)
            .map(|value| {
                value.parse::<T>().map_err(|err| ConfigError {
                    key,
                    reason: err.to_string(),
                    value,
                })
            })
            .transpose()
    }
}

fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}
