//! Refresh trigger: the one place a refresh cycle is started.
//!
//! Both drivers funnel through [`RefreshTrigger`]: the scheduler calls
//! [`RefreshTrigger::run`], the HTTP endpoint calls
//! [`RefreshTrigger::run_authorized`] with whatever token the caller
//! presented. A cycle is refresh-then-write; a failed refresh never reaches
//! the cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::cache::{CacheError, CacheStore};
use crate::feed::FeedSource;
use crate::refresh::{BatchRefresher, RefreshError};
use crate::regions::RegionRegistry;
use crate::security::SharedSecret;

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("a refresh is already in progress")]
    Busy,

    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),

    #[error("cache write failed: {0}")]
    Cache(#[from] CacheError),
}

/// Acknowledgement returned once a cycle has been written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshAck {
    pub status: &'static str,
    #[serde(serialize_with = "crate::cache::epoch_seconds::serialize")]
    pub updated: DateTime<Utc>,
    pub regions: usize,
    pub no_data: usize,
}

/// Runs refresh cycles against one registry and one cache record.
pub struct RefreshTrigger<S> {
    registry: Arc<RegionRegistry>,
    refresher: BatchRefresher<S>,
    store: CacheStore,
    secret: Option<SharedSecret>,
    in_flight: Mutex<()>,
}

impl<S> RefreshTrigger<S>
where
    S: FeedSource + 'static,
{
    /// A trigger with no shared secret: the on-demand path rejects every call.
    pub fn new(registry: Arc<RegionRegistry>, refresher: BatchRefresher<S>, store: CacheStore) -> Self {
        Self {
            registry,
            refresher,
            store,
            secret: None,
            in_flight: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_secret(mut self, secret: Option<SharedSecret>) -> Self {
        self.secret = secret;
        self
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn refresher(&self) -> &BatchRefresher<S> {
        &self.refresher
    }

    /// Checks a presented token without doing any work.
    pub fn authorize(&self, presented: Option<&str>) -> Result<(), TriggerError> {
        match (&self.secret, presented) {
            (Some(secret), Some(token)) if secret.matches(token) => Ok(()),
            (None, _) => {
                warn!("refresh rejected: no refresh token is configured");
                Err(TriggerError::Unauthorized)
            }
            _ => {
                warn!("refresh rejected: bad or missing token");
                Err(TriggerError::Unauthorized)
            }
        }
    }

    /// The on-demand path; authorization happens before anything else.
    pub async fn run_authorized(&self, presented: Option<&str>) -> Result<RefreshAck, TriggerError> {
        self.authorize(presented)?;
        self.run().await
    }

    /// Runs one cycle: refresh every region, then replace the cache record.
    ///
    /// # Errors
    ///
    /// [`TriggerError::Busy`] if a cycle is already running in this process;
    /// otherwise whatever the refresh or the write reported. The cache is
    /// only written after a complete snapshot exists.
    pub async fn run(&self) -> Result<RefreshAck, TriggerError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("refresh skipped: another cycle is still running");
            return Err(TriggerError::Busy);
        };

        let snapshot = self.refresher.refresh_all(&self.registry).await?;
        let record = self.store.write(&snapshot, Utc::now()).await?;

        let ack = RefreshAck {
            status: "updated",
            updated: record.timestamp,
            regions: record.trends.len(),
            no_data: record.trends.no_data_count(),
        };
        info!(
            updated = %ack.updated,
            regions = ack.regions,
            no_data = ack.no_data,
            "cache updated"
        );
        Ok(ack)
    }
}
