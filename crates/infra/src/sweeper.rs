//! Background sweepers.
//!
//! Two interval tasks bound the subsystem's memory and storage growth: one
//! purges rate-limit counter buckets past their 24h retention, the other
//! removes credential records long past expiry with no successful refresh.
//! Both are idempotent and stop promptly when the shutdown signal fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tallyport_common::resilience::rate_limit::RateLimiter;
use tallyport_core::credentials::ports::CredentialStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Periodically sweep stale rate-limit counter buckets.
pub fn spawn_counter_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = limiter.sweep();
                    debug!(removed, "counter sweep complete");
                }
                _ = shutdown.changed() => {
                    debug!("counter sweeper shutting down");
                    break;
                }
            }
        }
    })
}

/// Periodically purge credentials past the retention threshold.
pub fn spawn_retention_sweeper<S>(
    store: Arc<S>,
    retention: chrono::Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: CredentialStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cutoff = Utc::now() - retention;
                    match store.purge_stale(cutoff).await {
                        Ok(removed) => debug!(removed, "retention sweep complete"),
                        Err(err) => warn!(%err, "retention sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    debug!("retention sweeper shutting down");
                    break;
                }
            }
        }
    })
}
