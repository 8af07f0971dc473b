//! Orchestrators: batch download, stock-list download, concentration
//! refresh.
//!
//! Each orchestrator generates jobs for the engine and runs a fan-in loop
//! that drains the jobs' result channel into the sink. Completion is
//! channel-driven: every job and generator holds a clone of the result
//! sender, so once the last one finishes the channel closes and `recv`
//! returns `None`. The per-flow timeouts are a safety net against a wedged
//! scrape, not the primary completion signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::crawler::Fetcher;
use crate::engine::{JobQueue, PushError};
use crate::sink::{DataSink, SinkError};
use crate::telemetry::ErrorReporter;

mod concentration;
mod download;
mod refresh;
mod stock_list;

pub use concentration::{CalcError, ConcentrationCalculator};

/// Pause between fetches of the daily batch download.
pub const DOWNLOAD_RATE_LIMIT: Duration = Duration::from_millis(3000);
/// Safety-net deadline for the daily batch download.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(8 * 3600);
/// Pause between fetches of the stock-list download.
pub const STOCK_LIST_RATE_LIMIT: Duration = Duration::from_millis(1000);
/// Safety-net deadline for the stock-list download.
pub const STOCK_LIST_TIMEOUT: Duration = Duration::from_secs(20 * 60);
/// Pause between concentration refresh computations.
pub const REFRESH_RATE_LIMIT: Duration = Duration::from_secs(10);
/// Safety-net deadline for the concentration refresh.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(2 * 3600);
/// Refresh rows are written through in batches of this size.
pub const REFRESH_FLUSH_SIZE: usize = 50;

/// Orchestrator failure.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Could not enqueue a job
    #[error(transparent)]
    Queue(#[from] PushError),

    /// Sink rejected a write outside the per-batch retry path
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Dataset families of the batch download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// TWSE + TPEx daily closing quotes
    DailyClose,
    /// TWSE + TPEx institutional flow
    ThreePrimary,
    /// Per-stock broker-concentration pages
    StakeConcentration,
}

/// Parameters of one batch download run.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// How many days to rewind from the anchor; offsets
    /// `rewind_limit..=0` are scheduled (weekends skipped). Zero or
    /// negative.
    pub rewind_limit: i64,
    /// Per-job pause after result delivery
    pub rate_limit: Duration,
    /// Which dataset families to download
    pub kinds: Vec<BatchKind>,
    /// Safety-net deadline for the whole run
    pub timeout: Duration,
    /// Anchor date; `None` means today in Taipei
    pub anchor: Option<NaiveDate>,
}

impl Default for DownloadRequest {
    fn default() -> Self {
        Self {
            rewind_limit: 0,
            rate_limit: DOWNLOAD_RATE_LIMIT,
            kinds: vec![
                BatchKind::DailyClose,
                BatchKind::ThreePrimary,
                BatchKind::StakeConcentration,
            ],
            timeout: DOWNLOAD_TIMEOUT,
            anchor: None,
        }
    }
}

/// Parameters of one stock-list download run.
#[derive(Debug, Clone)]
pub struct StockListRequest {
    /// Per-job pause after result delivery
    pub rate_limit: Duration,
    /// Safety-net deadline
    pub timeout: Duration,
}

impl Default for StockListRequest {
    fn default() -> Self {
        Self {
            rate_limit: STOCK_LIST_RATE_LIMIT,
            timeout: STOCK_LIST_TIMEOUT,
        }
    }
}

/// Parameters of one concentration refresh run.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    /// How many days to rewind from the anchor; offsets
    /// `rewind_limit..=0` are refreshed (weekends skipped). Zero or
    /// negative.
    pub rewind_limit: i64,
    /// Per-job pause after each recomputation
    pub rate_limit: Duration,
    /// Safety-net deadline
    pub timeout: Duration,
    /// Anchor date; `None` means today in Taipei
    pub anchor: Option<NaiveDate>,
}

impl Default for RefreshRequest {
    fn default() -> Self {
        Self {
            rewind_limit: 0,
            rate_limit: REFRESH_RATE_LIMIT,
            timeout: REFRESH_TIMEOUT,
            anchor: None,
        }
    }
}

/// Outcome of a download fan-in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Result batches drained
    pub batches: usize,
    /// Records persisted
    pub records: usize,
    /// Sink writes that failed (reported, not fatal)
    pub sink_failures: usize,
    /// The safety-net deadline fired before completion
    pub timed_out: bool,
    /// The run was cancelled
    pub cancelled: bool,
}

/// Outcome of a refresh fan-in.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Concentration rows recomputed and written
    pub updated: usize,
    /// The safety-net deadline fired before completion
    pub timed_out: bool,
    /// The run was cancelled
    pub cancelled: bool,
}

/// Orchestrator facade over the engine, fetcher and sink.
pub struct Pipeline {
    queue: JobQueue,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn DataSink>,
    reporter: Arc<dyn ErrorReporter>,
    calculator: Arc<ConcentrationCalculator>,
}

impl Pipeline {
    pub fn new(
        queue: JobQueue,
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<dyn DataSink>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let calculator = Arc::new(ConcentrationCalculator::new(sink.clone()));
        Self {
            queue,
            fetcher,
            sink,
            reporter,
            calculator,
        }
    }

    pub(crate) fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub(crate) fn fetcher(&self) -> Arc<dyn Fetcher> {
        self.fetcher.clone()
    }

    pub(crate) fn sink(&self) -> Arc<dyn DataSink> {
        self.sink.clone()
    }

    pub(crate) fn reporter(&self) -> Arc<dyn ErrorReporter> {
        self.reporter.clone()
    }

    pub(crate) fn calculator(&self) -> Arc<ConcentrationCalculator> {
        self.calculator.clone()
    }
}

/// Resolve the anchor of a run: explicit date or today in Taipei.
pub(crate) fn resolve_anchor(anchor: Option<NaiveDate>) -> NaiveDate {
    anchor.unwrap_or_else(crate::source::taipei_today)
}

/// Shared fan-in loop shape: drain `rx` until it closes, the deadline
/// fires, or `cancel` does.
pub(crate) enum Drained<T> {
    Item(T),
    Completed,
    TimedOut,
    Cancelled,
}

pub(crate) async fn drain_one<T>(
    rx: &mut tokio::sync::mpsc::Receiver<T>,
    deadline: tokio::time::Instant,
    cancel: &CancellationToken,
) -> Drained<T> {
    tokio::select! {
        item = rx.recv() => match item {
            Some(item) => Drained::Item(item),
            None => Drained::Completed,
        },
        _ = tokio::time::sleep_until(deadline) => Drained::TimedOut,
        _ = cancel.cancelled() => Drained::Cancelled,
    }
}
