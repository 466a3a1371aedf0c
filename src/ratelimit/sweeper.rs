//! Background removal of expired rate limit entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::RateLimitStore;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A running sweep task bound to one store.
///
/// Dropping the sweeper aborts the task; [`stop`](Self::stop) shuts it down
/// and waits for it to finish.
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Sweeper {
    /// Spawn the sweep task on the current tokio runtime.
    ///
    /// The first sweep runs one `interval` after start. A zero interval falls
    /// back to [`DEFAULT_SWEEP_INTERVAL`].
    pub fn start(store: Arc<RateLimitStore>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!(
                default_secs = DEFAULT_SWEEP_INTERVAL.as_secs(),
                "Sweep interval must be non-zero, using default"
            );
            DEFAULT_SWEEP_INTERVAL
        } else {
            interval
        };

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(interval_ms = interval.as_millis() as u64, "Starting rate limit sweeper");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired();
                        debug!(
                            removed = removed,
                            remaining = store.len(),
                            "Swept expired rate limit entries"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Rate limit sweeper exited");
        });

        Self {
            shutdown_tx,
            handle: Some(handle),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the task to exit and wait for it.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Rate limit sweeper terminated abnormally");
            }
        }

        info!("Rate limit sweeper stopped");
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
