//! Unit of work executed by the worker pool.
//!
//! Jobs are a closed enum: the pool only ever runs page downloads and
//! concentration refreshes. Each job owns everything it needs to run
//! (fetcher, reporter, result channel, rate limit), so workers stay
//! generic executors with no knowledge of either flow.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::crawler::{FetchError, Fetcher};
use crate::parser::{self, ParseConfig, ParseError};
use crate::pipeline::ConcentrationCalculator;
use crate::source::Source;
use crate::telemetry::ErrorReporter;
use crate::{Record, StakeConcentration};

/// Job failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A dated source was scheduled without a trading-day string
    #[error("no trading day for {0}")]
    MissingDate(Source),

    /// A per-stock source was scheduled without a stock id
    #[error("no stock id for {0}")]
    MissingStockId(Source),

    /// Page fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Payload decode failed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Concentration recomputation failed
    #[error("calculation failed for {stock_id}: {reason}")]
    Calculation { stock_id: String, reason: String },

    /// The job was cancelled before completing
    #[error("job cancelled")]
    Cancelled,

    /// The orchestrator's result channel is gone
    #[error("result channel closed")]
    ResultChannelClosed,
}

/// Everything the pool can execute.
pub enum Job {
    /// Fetch and parse one source for one trading day (and stock, for
    /// per-stock sources), delivering one accumulated record batch.
    Download(DownloadJob),
    /// Recompute the concentration percentages of one stock/day from
    /// persisted volumes and differentials.
    Refresh(RefreshJob),
}

impl Job {
    /// Run the job to completion. Failures are reported through the job's
    /// [`ErrorReporter`] before being returned.
    pub async fn execute(self) -> Result<(), JobError> {
        match self {
            Job::Download(job) => job.run().await,
            Job::Refresh(job) => job.run().await,
        }
    }

    /// Short human-readable description for worker logs.
    pub fn describe(&self) -> String {
        match self {
            Job::Download(job) => match (&job.date, &job.stock_id) {
                (Some(date), Some(stock)) => format!("download {} {date} {stock}", job.source),
                (Some(date), None) => format!("download {} {date}", job.source),
                _ => format!("download {}", job.source),
            },
            Job::Refresh(job) => format!("refresh {} {}", job.stock_id, job.date),
        }
    }
}

/// Download job: one (source, date, stock) triple.
pub struct DownloadJob {
    /// Batch-level cancellation context
    pub cancel: CancellationToken,
    /// Scrape target
    pub source: Source,
    /// Trading day in the source's own format; `None` only for list sources
    pub date: Option<String>,
    /// Stock id for per-stock sources
    pub stock_id: Option<String>,
    /// Result channel back to the orchestrator's fan-in
    pub records_tx: mpsc::Sender<Vec<Record>>,
    /// Pause after the batch is delivered, before the worker slot is reused
    pub rate_limit: Duration,
    /// Fetch capability
    pub fetcher: Arc<dyn Fetcher>,
    /// Failure sink
    pub reporter: Arc<dyn ErrorReporter>,
}

impl DownloadJob {
    async fn run(self) -> Result<(), JobError> {
        match self.execute_inner().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.reporter.report(&err);
                Err(err)
            }
        }
    }

    async fn execute_inner(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        // deterministic pre-fetch validation: a malformed job never costs
        // an HTTP round trip
        let needs_date = self.source.date_format().is_some();
        if needs_date && self.date.is_none() {
            return Err(JobError::MissingDate(self.source));
        }
        if self.source.needs_stock_id() && self.stock_id.is_none() {
            return Err(JobError::MissingStockId(self.source));
        }

        let date = self.date.as_deref().unwrap_or_default();
        let urls = self.source.page_urls(date, self.stock_id.as_deref());

        let mut batch = Vec::new();
        for page_url in urls {
            debug!(url = %page_url.url, "downloading");
            let payload = self.fetcher.fetch(&page_url.url, &self.cancel).await?;

            let mut config = ParseConfig::new(self.source, self.date.clone());
            config.page = page_url.page;
            batch.extend(parser::parse(&config, &payload)?);
        }

        self.records_tx
            .send(batch)
            .await
            .map_err(|_| JobError::ResultChannelClosed)?;

        // one pause per job, after the result write, so the worker slot is
        // not reused before the configured gap has passed
        pace(self.rate_limit, &self.cancel).await;
        Ok(())
    }
}

/// Cancel-aware rate-limit pause. Cancellation cuts the pause short; the
/// job's work is already delivered at this point, so it is not an error.
async fn pace(rate_limit: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(rate_limit) => {}
        _ = cancel.cancelled() => {}
    }
}

/// Refresh job: recompute one stock/day concentration aggregate.
pub struct RefreshJob {
    /// Batch-level cancellation context
    pub cancel: CancellationToken,
    /// Trading day, `YYYY-MM-DD`
    pub date: String,
    /// Stock to recompute
    pub stock_id: String,
    /// Result channel back to the refresh fan-in
    pub result_tx: mpsc::Sender<StakeConcentration>,
    /// Pause after the aggregate is delivered
    pub rate_limit: Duration,
    /// Calculator over the persistence sink
    pub calculator: Arc<ConcentrationCalculator>,
    /// Failure sink
    pub reporter: Arc<dyn ErrorReporter>,
}

impl RefreshJob {
    async fn run(self) -> Result<(), JobError> {
        match self.execute_inner().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.reporter.report(&err);
                Err(err)
            }
        }
    }

    async fn execute_inner(&self) -> Result<(), JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let result = self
            .calculator
            .calculate(&self.stock_id, &self.date)
            .await
            .map_err(|e| JobError::Calculation {
                stock_id: self.stock_id.clone(),
                reason: e.to_string(),
            })?;

        // no base row for this stock/day: nothing to refresh
        let Some(updated) = result else {
            debug!(stock = %self.stock_id, date = %self.date, "no concentration row, skipping");
            return Ok(());
        };

        self.result_tx
            .send(updated)
            .await
            .map_err(|_| JobError::ResultChannelClosed)?;

        pace(self.rate_limit, &self.cancel).await;
        Ok(())
    }
}
