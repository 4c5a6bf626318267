//! In-process periodic refresh.
//!
//! For deployments without an external timer, `serve` can drive the
//! scheduled trigger itself. The first cycle runs immediately; a cycle that
//! overruns the period delays the next tick instead of bunching them up.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::feed::FeedSource;
use crate::trigger::{RefreshTrigger, TriggerError};

/// Spawns the scheduler loop; abort the handle to stop it.
pub fn spawn_periodic<S>(trigger: Arc<RefreshTrigger<S>>, every: Duration) -> JoinHandle<()>
where
    S: FeedSource + 'static,
{
    info!(every = ?every, "periodic refresh enabled");
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match trigger.run().await {
                Ok(ack) => info!(regions = ack.regions, no_data = ack.no_data, "scheduled refresh done"),
                Err(TriggerError::Busy) => warn!("scheduled refresh skipped; a refresh is in progress"),
                Err(err) => error!(error = %err, "scheduled refresh failed"),
            }
        }
    })
}
