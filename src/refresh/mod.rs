//! Batch refresh: every region fetched once under a concurrency ceiling.
//!
//! [`BatchRefresher::refresh_all`] spawns one task per region onto a
//! [`JoinSet`], gating each behind a [`Semaphore`] permit so no more than
//! `concurrency` fetches are ever in flight. Each task returns its own
//! `(code, label)` pair; the pairs are merged only after every task has
//! finished, so workers never share a mutable map.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{error, info};

use crate::feed::{FeedFetcher, FeedSource};
use crate::regions::{RegionCode, RegionRegistry};
use crate::trends::{MissingRegion, TrendLabel, TrendSnapshot};

/// Default worker-pool ceiling.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// A refresh cycle could not complete; no snapshot was produced.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("worker pool unavailable: {0}")]
    Pool(#[from] tokio::sync::AcquireError),

    #[error("fetch worker failed: {0}")]
    Worker(#[from] JoinError),

    #[error(transparent)]
    Incomplete(#[from] MissingRegion),
}

/// Drives a [`FeedFetcher`] across a whole registry.
pub struct BatchRefresher<S> {
    fetcher: Arc<FeedFetcher<S>>,
    concurrency: usize,
}

impl<S> BatchRefresher<S>
where
    S: FeedSource + 'static,
{
    /// `concurrency` is clamped to at least one worker.
    pub fn new(fetcher: FeedFetcher<S>, concurrency: usize) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn fetcher(&self) -> &FeedFetcher<S> {
        &self.fetcher
    }

    /// Fetches every region in `registry` and returns the complete snapshot.
    ///
    /// Waits for every region to resolve; per-region failures are already
    /// folded into the sentinel label by the fetcher. Completion order is not
    /// observable in the result.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError`] only when the worker pool itself fails (a
    /// closed semaphore, a panicked or cancelled task, or a region left
    /// without a label). Outstanding tasks are aborted and no partial
    /// snapshot is returned.
    pub async fn refresh_all(&self, registry: &RegionRegistry) -> Result<TrendSnapshot, RefreshError> {
        let started = Instant::now();
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut workers: JoinSet<(RegionCode, TrendLabel)> = JoinSet::new();

        for code in registry.codes() {
            let permit = Arc::clone(&permits).acquire_owned().await?;
            let fetcher = Arc::clone(&self.fetcher);
            let code = code.clone();
            workers.spawn(async move {
                let _permit = permit;
                let label = fetcher.fetch(&code).await;
                (code, label)
            });
        }

        let mut labels = BTreeMap::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((code, label)) => {
                    labels.insert(code, label);
                }
                Err(err) => {
                    error!(error = %err, "fetch worker failed; aborting refresh");
                    workers.abort_all();
                    return Err(err.into());
                }
            }
        }

        let snapshot = TrendSnapshot::assemble(registry, labels)?;
        info!(
            regions = snapshot.len(),
            no_data = snapshot.no_data_count(),
            elapsed = ?started.elapsed(),
            "refresh cycle complete"
        );
        Ok(snapshot)
    }
}
