//! Background eviction of idle buckets.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::limiter::RateLimiter;

/// Default cadence for sweep passes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Periodic sweep of a limiter's stale buckets.
///
/// The sweep runs as an explicit background task with a deterministic
/// shutdown, so tests can start and stop it rather than racing a
/// free-running timer. Keys that fall out of use are evicted on the
/// limiter's stale threshold, bounding memory growth.
pub struct Sweeper {
    /// The limiter to sweep
    limiter: Arc<RateLimiter>,
    /// Time between sweep passes
    interval: Duration,
}

impl Sweeper {
    /// Create a sweeper with the default cadence.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            interval: SWEEP_INTERVAL,
        }
    }

    /// Override the sweep cadence.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the sweep task.
    ///
    /// The task runs until [`SweeperHandle::shutdown`] is awaited or the
    /// handle is dropped with [`SweeperHandle::abort`].
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        debug!(
            interval_secs = self.interval.as_secs(),
            "Starting bucket sweeper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = self.limiter.sweep();
                        trace!(evicted = evicted, "Sweep pass complete");
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Sweeper shutting down");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running sweep task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep task and wait for it to exit.
    pub async fn shutdown(self) {
        // The receiver is gone only if the task already exited.
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Abort the sweep task without waiting for it.
    pub fn abort(&self) {
        self.task.abort();
    }
}
