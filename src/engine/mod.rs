//! Job engine: bounded queue, dispatcher, fixed worker pool.
//!
//! [`Engine::start`] wires the three together and returns the producer-side
//! [`JobQueue`] plus a handle whose [`Engine::shutdown`] stops the pool and
//! waits for every worker to acknowledge.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod dispatcher;
pub mod job;
mod queue;
mod worker;

pub use job::{DownloadJob, Job, JobError, RefreshJob};
pub use queue::{JobQueue, PushError};

/// Running engine handle.
pub struct Engine {
    stop: CancellationToken,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Start a pool of `max_workers` workers behind a queue of
    /// `queue_capacity` jobs.
    pub fn start(max_workers: usize, queue_capacity: usize) -> (JobQueue, Engine) {
        let stop = CancellationToken::new();
        let (queue, queue_rx) = JobQueue::bounded(queue_capacity);

        // registry capacity equals the pool size: it can hold every idle
        // inbox but never more
        let (registry_tx, registry_rx) = mpsc::channel(max_workers);

        let workers = (0..max_workers)
            .map(|id| tokio::spawn(worker::run(id, registry_tx.clone(), stop.clone())))
            .collect();

        let dispatcher = tokio::spawn(dispatcher::run(
            queue_rx,
            registry_rx,
            max_workers,
            stop.clone(),
        ));

        info!(max_workers, queue_capacity, "engine started");
        (queue, Engine {
            stop,
            dispatcher,
            workers,
        })
    }

    /// Stop the pool and wait for the dispatcher and every worker to exit.
    /// In-flight jobs run to completion; queued jobs are dropped.
    pub async fn shutdown(self) {
        self.stop.cancel();
        self.dispatcher.await.ok();
        for worker in self.workers {
            worker.await.ok();
        }
        info!("engine stopped");
    }
}
