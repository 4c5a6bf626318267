//! Snapshot cache: one durable record, replaced atomically on every write.
//!
//! The record is a JSON document `{"timestamp": <epoch seconds>, "trends":
//! {<code>: <label>, ...}}`. Writes go to a sibling temporary file which is
//! flushed to disk and then renamed over the record, so a reader sees either
//! the previous record or the new one, never a mix.
//!
//! Reads never touch the network. Freshness is evaluated against a `now`
//! supplied by the caller, and the record's age is always reported so the
//! caller can decide whether to warn, refuse, or serve regardless.

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::trends::TrendSnapshot;

/// Default location of the cache record.
pub const DEFAULT_CACHE_FILE: &str = "trends_cache.json";

/// Default freshness window (30 minutes).
pub const DEFAULT_MAX_AGE_SECS: i64 = 1800;

/// Errors produced by the cache store and its read path.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache record at {path} is unreadable: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode cache record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("no cached trends are available yet")]
    Unavailable,

    #[error("cached trends are {age_seconds}s old, beyond the {max_age_seconds}s window")]
    Stale { age_seconds: i64, max_age_seconds: i64 },
}

/// The persisted snapshot and the instant it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(with = "epoch_seconds")]
    pub timestamp: DateTime<Utc>,
    pub trends: TrendSnapshot,
}

impl CacheRecord {
    /// Age of the record at `now`; a record stamped in the future has age zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }
}

/// Outcome of a freshness-checked read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// `age <= max_age`.
    Fresh { record: CacheRecord, age: Duration },
    /// `age > max_age`; the record is still returned.
    Stale { record: CacheRecord, age: Duration },
    /// Nothing has ever been written.
    Absent,
}

/// What the read path does with a record older than the freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Serve it, flagged as stale.
    #[default]
    Serve,
    /// Report [`CacheError::Stale`] instead.
    Refuse,
}

impl FromStr for StalePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "serve" => Ok(Self::Serve),
            "refuse" => Ok(Self::Refuse),
            other => Err(format!("expected `serve` or `refuse`, got `{other}`")),
        }
    }
}

/// Freshness window plus the policy applied beyond it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub max_age: Duration,
    pub policy: StalePolicy,
}

impl Default for Freshness {
    fn default() -> Self {
        Self {
            max_age: Duration::seconds(DEFAULT_MAX_AGE_SECS),
            policy: StalePolicy::Serve,
        }
    }
}

/// A snapshot handed to the presentation layer, with its age made explicit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedSnapshot {
    pub record: CacheRecord,
    pub age: Duration,
    pub stale: bool,
}

/// File-backed store holding a single [`CacheRecord`].
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persists `snapshot` stamped with `now`, replacing any prior record.
    ///
    /// If the existing record carries a timestamp at or after `now` (the wall
    /// clock stepped backwards), the new record is stamped one millisecond
    /// after it so timestamps keep increasing across writes.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] or [`CacheError::Encode`]; on error the
    /// previous record is left untouched.
    pub async fn write(&self, snapshot: &TrendSnapshot, now: DateTime<Utc>) -> Result<CacheRecord, CacheError> {
        // The on-disk format carries microseconds; stamp at that precision so
        // the returned record equals what a later load produces.
        let mut timestamp = now.trunc_subsecs(6);
        match self.load().await {
            Ok(Some(previous)) if previous.timestamp >= timestamp => {
                warn!(
                    previous = %previous.timestamp,
                    now = %now,
                    "clock is behind the cached record; advancing timestamp"
                );
                timestamp = previous.timestamp + Duration::milliseconds(1);
            }
            Ok(_) => {}
            Err(err) => debug!(error = %err, "ignoring unreadable previous record"),
        }

        let record = CacheRecord {
            timestamp,
            trends: snapshot.clone(),
        };
        let encoded = serde_json::to_vec(&record).map_err(CacheError::Encode)?;
        self.replace(&encoded).await?;

        debug!(path = %self.path.display(), regions = record.trends.len(), "cache record written");
        Ok(record)
    }

    /// Loads the record, or `None` if none has been written.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the file exists but cannot be read, and
    /// [`CacheError::Decode`] if its contents are not a valid record.
    pub async fn load(&self) -> Result<Option<CacheRecord>, CacheError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| CacheError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    /// Loads the record once and classifies it against `max_age` at `now`.
    ///
    /// # Errors
    ///
    /// Same as [`CacheStore::load`].
    pub async fn read_if_fresh(&self, max_age: Duration, now: DateTime<Utc>) -> Result<CacheLookup, CacheError> {
        let Some(record) = self.load().await? else {
            return Ok(CacheLookup::Absent);
        };

        let age = record.age_at(now);
        if age > max_age {
            Ok(CacheLookup::Stale { record, age })
        } else {
            Ok(CacheLookup::Fresh { record, age })
        }
    }

    /// The read API consumed by the presentation layer.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Unavailable`]: nothing has been written yet.
    /// - [`CacheError::Stale`]: the record is too old and `freshness.policy`
    ///   is [`StalePolicy::Refuse`].
    /// - Any error from [`CacheStore::load`].
    pub async fn get_snapshot(&self, freshness: Freshness, now: DateTime<Utc>) -> Result<ServedSnapshot, CacheError> {
        match self.read_if_fresh(freshness.max_age, now).await? {
            CacheLookup::Absent => Err(CacheError::Unavailable),
            CacheLookup::Fresh { record, age } => Ok(ServedSnapshot {
                record,
                age,
                stale: false,
            }),
            CacheLookup::Stale { age, .. } if freshness.policy == StalePolicy::Refuse => Err(CacheError::Stale {
                age_seconds: age.num_seconds(),
                max_age_seconds: freshness.max_age.num_seconds(),
            }),
            CacheLookup::Stale { record, age } => {
                warn!(age_seconds = age.num_seconds(), "serving stale trends");
                Ok(ServedSnapshot {
                    record,
                    age,
                    stale: true,
                })
            }
        }
    }

    // Write-then-rename so the record is never observed half written.
    async fn replace(&self, contents: &[u8]) -> Result<(), CacheError> {
        let io_err = |source: io::Error| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let staging = self.staging_path();
        let result = async {
            let mut file = fs::File::create(&staging).await?;
            file.write_all(contents).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&staging, &self.path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&staging).await;
            return Err(io_err(err));
        }
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_CACHE_FILE.to_owned());
        self.path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
    }
}

/// Fractional Unix seconds, the on-disk timestamp format.
pub(crate) mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.timestamp_micros() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        if !seconds.is_finite() {
            return Err(de::Error::custom("timestamp is not a finite number"));
        }
        DateTime::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
            .ok_or_else(|| de::Error::custom(format!("timestamp {seconds} is out of range")))
    }
}
