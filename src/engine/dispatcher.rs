//! Dispatcher: drains the job queue and forwards to idle workers.
//!
//! Forwarding happens on spawned tasks so a queue drain never blocks behind
//! a fully busy pool, but the number of in-flight forwards is capped by a
//! semaphore; the queue keeps exerting backpressure instead of ballooning
//! into an unbounded task pile.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::job::Job;
use super::worker::JobSender;

/// Forwards cap, in multiples of the pool size.
const FORWARD_FACTOR: usize = 2;

/// Run the dispatcher until the queue closes or `stop` fires.
pub(crate) async fn run(
    mut queue_rx: mpsc::Receiver<Job>,
    registry_rx: mpsc::Receiver<JobSender>,
    max_workers: usize,
    stop: CancellationToken,
) {
    // workers push their idle inboxes here; receivers are handed out one
    // forward at a time under the mutex
    let registry = Arc::new(Mutex::new(registry_rx));
    let permits = Arc::new(Semaphore::new(max_workers * FORWARD_FACTOR));

    loop {
        let job = tokio::select! {
            job = queue_rx.recv() => job,
            _ = stop.cancelled() => break,
        };
        let Some(job) = job else { break };

        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => {
                match permit {
                    Ok(p) => p,
                    Err(_) => break,
                }
            }
            _ = stop.cancelled() => break,
        };

        let registry = registry.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let inbox = tokio::select! {
                inbox = async { registry.lock().await.recv().await } => inbox,
                _ = stop.cancelled() => None,
            };
            if let Some(inbox) = inbox {
                // worker may have stopped between registering and now
                let _ = inbox.send(job).await;
            }
        });
    }
    debug!("dispatcher stopped");
}
