//! Injected job queue.
//!
//! The queue is the only coupling between orchestrators and the engine: a
//! bounded channel whose receiver the dispatcher owns. Producers block on a
//! full queue, which gives natural backpressure when generators outrun the
//! worker pool.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::job::Job;

/// Queue push failure.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// The caller's context was cancelled while waiting for capacity
    #[error("push cancelled")]
    Cancelled,

    /// The engine has shut down and the receiver is gone
    #[error("job queue closed")]
    Closed,
}

/// Cloneable producer handle for the engine's job queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Create a bounded queue, returning the producer handle and the
    /// receiver the dispatcher will drain.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Push one job, waiting for capacity. Returns early when `cancel`
    /// fires so an aborted batch never wedges on a full queue.
    pub async fn push(&self, job: Job, cancel: &CancellationToken) -> Result<(), PushError> {
        tokio::select! {
            res = self.tx.send(job) => res.map_err(|_| PushError::Closed),
            _ = cancel.cancelled() => Err(PushError::Cancelled),
        }
    }
}
