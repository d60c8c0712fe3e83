//! Polling worker for periodic sync

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::app::state::DaemonState;
use crate::errors::AgentError;
use crate::sync::syncer::{SyncOutcome, TaskSyncer};
use crate::utils::jittered;

/// Poller worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,

    /// Fraction of the interval applied as +/- jitter
    pub jitter: f64,

    /// Initial delay before first poll
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            jitter: 0.1,
            initial_delay: Duration::from_secs(5),
        }
    }
}

/// Run the poller worker.
///
/// A cycle runs every jittered interval, or right away when a sync is
/// requested through the daemon state. `shutdown` also aborts a cycle that
/// is waiting on token backoff.
pub async fn run<S, F>(
    options: &Options,
    syncer: &TaskSyncer,
    daemon: &DaemonState,
    sleep_fn: S,
    shutdown: CancellationToken,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Poller worker starting...");

    tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Poller worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        debug!("Polling base...");
        match syncer.sync_once(&shutdown).await {
            Ok(SyncOutcome::Skipped(reason)) => debug!("Sync skipped: {}", reason),
            Ok(SyncOutcome::Synced { .. }) => {}
            Err(AgentError::Cancelled(_)) => {}
            Err(e) => error!("Sync failed: {}", e),
        }

        let wait = jittered(options.interval, options.jitter);
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Poller worker shutting down...");
                return;
            }
            _ = daemon.sync_requested() => {
                debug!("Sync requested");
            }
            _ = sleep_fn(wait) => {}
        }
    }
}
