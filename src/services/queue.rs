//! Bounded FIFO queue of deferred background operations.

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// A deferred operation. It receives the shutdown token and reports success.
pub type WorkItem = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, bool> + Send>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Work queue is closed")]
    Closed,
}

pub struct WorkQueue {
    sender: mpsc::Sender<WorkItem>,
    receiver: Mutex<mpsc::Receiver<WorkItem>>,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        tracing::info!(capacity, "Work queue initialized");
        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items waiting to be picked up.
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds `item` to the back of the queue, waiting for space while the queue is full.
    pub async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        self.sender.send(item).await.map_err(|_| QueueError::Closed)?;
        tracing::debug!("Task enqueued");
        Ok(())
    }

    /// Convenience wrapper that boxes an async closure into a [`WorkItem`].
    pub async fn enqueue_fn<F, Fut>(&self, f: F) -> Result<(), QueueError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = bool> + Send + 'static,
    {
        self.enqueue(Box::new(move |token| Box::pin(f(token)) as BoxFuture<'static, bool>))
            .await
    }

    /// Waits for the next item. Returns `None` once `cancel` fires, which is the
    /// normal shutdown path rather than an error.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<WorkItem> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Dequeue cancelled");
                None
            }
            item = async { self.receiver.lock().await.recv().await } => item,
        }
    }

    /// Takes the next item without waiting. Used to drain leftovers at shutdown.
    pub async fn try_dequeue(&self) -> Option<WorkItem> {
        self.receiver.lock().await.try_recv().ok()
    }
}
