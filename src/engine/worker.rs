//! Pool worker: a single-job inbox plus an idle-registration loop.
//!
//! A worker advertises availability by sending its inbox sender onto the
//! pool registry, then waits for exactly one job. Because the registry only
//! ever holds idle inboxes, the dispatcher never queues behind a busy
//! worker, and the registry capacity doubles as the pool's concurrency
//! bound.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::job::Job;

/// Sender half of one worker's single-slot inbox.
pub(crate) type JobSender = mpsc::Sender<Job>;

/// Run one worker until `stop` fires or the registry closes.
///
/// Stopping is acknowledged: the future only resolves after the current job
/// (if any) has finished, so joining the worker task guarantees nothing is
/// still executing.
pub(crate) async fn run(id: usize, registry: mpsc::Sender<JobSender>, stop: CancellationToken) {
    loop {
        let (inbox_tx, mut inbox_rx) = mpsc::channel::<Job>(1);

        tokio::select! {
            res = registry.send(inbox_tx) => {
                if res.is_err() {
                    // dispatcher is gone
                    break;
                }
            }
            _ = stop.cancelled() => break,
        }

        tokio::select! {
            job = inbox_rx.recv() => {
                let Some(job) = job else { break };
                let what = job.describe();
                debug!(worker = id, job = %what, "executing");
                if let Err(err) = job.execute().await {
                    warn!(worker = id, job = %what, error = %err, "job failed");
                }
            }
            _ = stop.cancelled() => break,
        }
    }
    debug!(worker = id, "worker stopped");
}
