//! Cron-driven, lock-gated batch trigger.
//!
//! A trigger request arms a cron schedule; on every tick the instance
//! races for the distributed lock and, if it wins, runs the daily batch
//! download. Arming is gated on the `START_CRON` environment switch so
//! only designated instances ever schedule work.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lock::DistributedLock;
use crate::pipeline::{DownloadRequest, Pipeline};

/// Lock key shared by every instance racing for a cron tick.
pub const CRON_LOCK_KEY: &str = "twstock-ingest:cron-lock";
/// Lock TTL: long enough to cover clock skew between instances, far
/// shorter than a batch run. The batch itself runs after release-by-TTL
/// would occur; dedup only has to cover the tick window.
pub const CRON_LOCK_TTL: Duration = Duration::from_secs(120);

/// Environment switch that allows this instance to arm cron schedules.
pub const START_CRON_ENV: &str = "START_CRON";

/// HTTP-shaped outcome of a trigger request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerResponse {
    /// 200 armed, 400 bad schedule, 401 gate disabled
    pub code: u16,
    /// Human-readable detail
    pub message: String,
}

/// Whether this instance is allowed to arm cron schedules.
pub fn cron_enabled_from_env() -> bool {
    std::env::var(START_CRON_ENV)
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Accept 5-field (minute-resolution) expressions by prepending a seconds
/// field; 6- and 7-field expressions pass through.
fn normalize_schedule(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Arms cron schedules over a pipeline and a distributed lock.
pub struct CronTrigger {
    pipeline: Arc<Pipeline>,
    lock: Arc<dyn DistributedLock>,
    enabled: bool,
}

impl CronTrigger {
    pub fn new(pipeline: Arc<Pipeline>, lock: Arc<dyn DistributedLock>, enabled: bool) -> Self {
        Self {
            pipeline,
            lock,
            enabled,
        }
    }

    /// Arm `expr`. On success the schedule loop runs until `root_cancel`
    /// fires; each winning tick gets a fresh long-lived cancellation token
    /// so a batch abort never tears down the schedule itself.
    pub fn start(
        &self,
        expr: &str,
        request: DownloadRequest,
        root_cancel: CancellationToken,
    ) -> TriggerResponse {
        if !self.enabled {
            return TriggerResponse {
                code: 401,
                message: format!("{START_CRON_ENV} is not enabled on this instance"),
            };
        }

        let normalized = normalize_schedule(expr);
        let schedule = match Schedule::from_str(&normalized) {
            Ok(schedule) => schedule,
            Err(err) => {
                return TriggerResponse {
                    code: 400,
                    message: format!("invalid cron expression {expr:?}: {err}"),
                }
            }
        };

        let pipeline = self.pipeline.clone();
        let lock = self.lock.clone();
        tokio::spawn(run_schedule(
            schedule, request, pipeline, lock, root_cancel,
        ));

        TriggerResponse {
            code: 200,
            message: format!("cron armed: {normalized}"),
        }
    }
}

async fn run_schedule(
    schedule: Schedule,
    request: DownloadRequest,
    pipeline: Arc<Pipeline>,
    lock: Arc<dyn DistributedLock>,
    root_cancel: CancellationToken,
) {
    info!(schedule = %schedule, "cron loop started");
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            debug!("schedule exhausted");
            break;
        };
        let wait = (next - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = root_cancel.cancelled() => break,
        }

        match lock.obtain(CRON_LOCK_KEY, CRON_LOCK_TTL).await {
            Ok(Some(guard)) => {
                info!(tick = %next, "won cron tick, starting batch");
                let batch_cancel = CancellationToken::new();
                let result = pipeline
                    .batching_download(batch_cancel, request.clone())
                    .await;
                if let Err(err) = result {
                    warn!(error = %err, "cron batch failed");
                }
                if let Err(err) = lock.release(guard).await {
                    warn!(error = %err, "lock release failed");
                }
            }
            Ok(None) => debug!(tick = %next, "another instance won the tick"),
            Err(err) => warn!(error = %err, "lock backend unavailable, skipping tick"),
        }
    }
    info!("cron loop stopped");
}
