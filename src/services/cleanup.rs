use crate::services::job_registry::JobRegistry;
use crate::services::queue::WorkQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodically enqueues a sweep that drops job records older than `retention`.
/// The first sweep runs after `initial_delay`, then every `interval`.
pub fn spawn_cleanup_scheduler(
    queue: Arc<WorkQueue>,
    jobs: Arc<JobRegistry>,
    retention: Duration,
    initial_delay: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            retention_secs = retention.as_secs(),
            interval_secs = interval.as_secs(),
            "🧹 Job cleanup scheduler started"
        );

        // interval_at panics on a zero period
        let period = interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let jobs = jobs.clone();
            let enqueued = tokio::select! {
                _ = shutdown.cancelled() => break,
                res = queue.enqueue_fn(move |_| async move {
                    sweep_expired_jobs(&jobs, retention);
                    true
                }) => res,
            };

            if let Err(e) = enqueued {
                tracing::error!("Failed to enqueue job cleanup: {}", e);
                break;
            }
        }

        tracing::info!("Job cleanup scheduler stopped");
    })
}

/// Runs one sweep and returns the number of removed records.
pub fn sweep_expired_jobs(jobs: &JobRegistry, retention: Duration) -> usize {
    let removed = jobs.cleanup_older_than(retention);
    if removed > 0 {
        tracing::info!(removed, remaining = jobs.len(), "Cleaned up expired scan jobs");
    } else {
        tracing::debug!("No expired scan jobs to clean up");
    }
    removed
}
