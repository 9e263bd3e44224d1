use crate::services::queue::{WorkItem, WorkQueue};
use crate::services::telemetry;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fixed set of workers draining a shared [`WorkQueue`].
pub struct WorkerPool {
    queue: Arc<WorkQueue>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers. They stop when `shutdown` is cancelled.
    pub fn start(queue: Arc<WorkQueue>, worker_count: usize, shutdown: CancellationToken) -> Self {
        let worker_count = worker_count.max(1);
        tracing::info!(worker_count, "🚀 Starting background workers");

        let active = Arc::new(AtomicUsize::new(0));
        let handles = (1..=worker_count)
            .map(|worker_id| {
                let worker = BackgroundWorker {
                    worker_id,
                    worker_count,
                    queue: queue.clone(),
                    shutdown: shutdown.clone(),
                    active: active.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        Self {
            queue,
            shutdown,
            handles,
            active,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Workers currently executing an operation.
    pub fn active_workers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Signals every worker to stop and waits for all of them to return.
    /// Operations already running are allowed to finish. Operations still queued
    /// are then run once with the cancelled token so they can release what they hold.
    pub async fn shutdown(self) {
        tracing::info!("🛑 Stopping background workers");
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed to join: {}", e);
            }
        }

        let mut drained = 0usize;
        while let Some(item) = self.queue.try_dequeue().await {
            drained += 1;
            run_item(0, item, self.shutdown.clone()).await;
        }
        if drained > 0 {
            tracing::info!(drained, "Released operations left in the queue");
        }
        tracing::info!("✅ All background workers stopped");
    }
}

struct BackgroundWorker {
    worker_id: usize,
    worker_count: usize,
    queue: Arc<WorkQueue>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl BackgroundWorker {
    async fn run(self) {
        tracing::info!(worker_id = self.worker_id, "Worker started");

        while let Some(item) = self.queue.dequeue(&self.shutdown).await {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            telemetry::worker_utilization(active, self.worker_count);
            telemetry::queue_depth(self.queue.len(), self.queue.capacity());

            run_item(self.worker_id, item, self.shutdown.clone()).await;

            self.active.fetch_sub(1, Ordering::SeqCst);
        }

        tracing::info!(worker_id = self.worker_id, "Worker stopped");
    }
}

/// Runs one operation; a panicking operation must not take the worker down with it.
async fn run_item(worker_id: usize, item: WorkItem, token: CancellationToken) {
    tracing::debug!(worker_id, "Worker processing task");

    match AssertUnwindSafe(item(token)).catch_unwind().await {
        Ok(true) => tracing::debug!(worker_id, "Task completed successfully"),
        Ok(false) => tracing::debug!(worker_id, "Task reported failure"),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                worker_id,
                "Worker encountered an error processing task: {}",
                message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_drains_queue() {
        let queue = Arc::new(WorkQueue::new(16));
        let pool = WorkerPool::start(queue.clone(), 4, CancellationToken::new());
        assert_eq!(pool.worker_count(), 4);
        assert_eq!(pool.active_workers(), 0);

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = done.clone();
            queue
                .enqueue_fn(move |_| async move {
                    done.fetch_add(1, Ordering::SeqCst);
                    true
                })
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while done.load(Ordering::SeqCst) < 20 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("all tasks processed");

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_worker() {
        let queue = Arc::new(WorkQueue::new(4));
        let pool = WorkerPool::start(queue.clone(), 1, CancellationToken::new());

        queue
            .enqueue_fn(|_| async {
                let verdict: Option<bool> = None;
                verdict.expect("bad job")
            })
            .await
            .unwrap();
        queue.enqueue_fn(|_| async { false }).await.unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        queue
            .enqueue_fn(move |_| async move {
                let _ = tx.send(());
                true
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("worker survived the panic")
            .unwrap();

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_task() {
        let queue = Arc::new(WorkQueue::new(4));
        let pool = WorkerPool::start(queue.clone(), 2, CancellationToken::new());

        let finished = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        {
            let finished = finished.clone();
            queue
                .enqueue_fn(move |_| async move {
                    let _ = started_tx.send(());
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    true
                })
                .await
                .unwrap();
        }

        started_rx.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown completes");
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_items_left_in_queue() {
        let queue = Arc::new(WorkQueue::new(4));
        let token = CancellationToken::new();
        token.cancel();

        let (tx, rx) = tokio::sync::oneshot::channel();
        queue
            .enqueue_fn(move |cancel| async move {
                let _ = tx.send(cancel.is_cancelled());
                true
            })
            .await
            .unwrap();

        let pool = WorkerPool::start(queue.clone(), 2, token);
        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("shutdown completes");

        assert!(rx.await.expect("queued item ran"), "item sees the cancelled token");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_worker_emits_utilization_metrics() {
        let (events, _guard) = crate::services::telemetry::capture::install();
        let queue = Arc::new(WorkQueue::new(4));
        let pool = WorkerPool::start(queue.clone(), 3, CancellationToken::new());

        let (tx, rx) = tokio::sync::oneshot::channel();
        queue
            .enqueue_fn(move |_| async move {
                let _ = tx.send(());
                true
            })
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("task ran")
            .unwrap();
        pool.shutdown().await;

        let utilization = events.named("worker_utilization");
        assert_eq!(utilization.len(), 1);
        assert_eq!(utilization[0].fields["active_workers"], "1");
        assert_eq!(utilization[0].fields["total_workers"], "3");

        let depth = events.named("queue_depth");
        assert_eq!(depth.len(), 1);
        assert_eq!(depth[0].fields["capacity"], "4");
    }

    #[tokio::test]
    async fn test_shutdown_with_idle_workers() {
        let queue = Arc::new(WorkQueue::new(4));
        let token = CancellationToken::new();
        let pool = WorkerPool::start(queue, 3, token.clone());
        tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
            .await
            .expect("idle workers exit promptly");
        assert!(token.is_cancelled());
    }
}
