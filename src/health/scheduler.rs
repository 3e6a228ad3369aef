//! Periodic health checks.
//!
//! # Responsibilities
//! - Run one independent probe loop per backend
//! - Jitter the first tick so backends sharing an interval do not probe in lockstep
//! - Stop every loop promptly on cancellation
//!
//! A slow backend only delays its own loop. Missed ticks are skipped, never queued.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::health::probe::HealthProbe;
use crate::health::tracker::{BackendHealthTracker, TickOutcome};

/// Handle to the running probe loops of one runtime generation.
pub struct ProbeTasks {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl ProbeTasks {
    /// Spawn a loop for every tracker with health checks enabled.
    pub fn spawn(trackers: &[Arc<BackendHealthTracker>], probe: HealthProbe) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for tracker in trackers {
            if !tracker.spec().health.enabled {
                tracing::info!(backend = %tracker.id(), "Health checks disabled for backend");
                continue;
            }
            tasks.spawn(run_backend(tracker.clone(), probe.clone(), cancel.child_token()));
        }

        tracing::info!(loops = tasks.len(), "Health scheduler started");
        Self { cancel, tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every loop and wait for them to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        while self.tasks.join_next().await.is_some() {}
        tracing::debug!("Health scheduler stopped");
    }
}

impl Drop for ProbeTasks {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_backend(tracker: Arc<BackendHealthTracker>, probe: HealthProbe, cancel: CancellationToken) {
    let period = tracker.spec().health.interval.max(Duration::from_millis(1));
    let start = Instant::now() + initial_jitter(period);
    let mut ticker = time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!(
        backend = %tracker.id(),
        interval_ms = period.as_millis() as u64,
        "Health check loop starting"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = tracker.tick(&probe) => outcome,
                };
                if let TickOutcome::Probed { success } = outcome {
                    tracing::trace!(backend = %tracker.id(), success, "Health check completed");
                }
            }
        }
    }

    tracing::debug!(backend = %tracker.id(), "Health check loop exiting");
}

/// Up to a tenth of the interval, capped at one second.
fn initial_jitter(period: Duration) -> Duration {
    let max = (period / 10).min(Duration::from_secs(1));
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}
