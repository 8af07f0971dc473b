//! Concentration refresh orchestrator.
//!
//! Walks the stock registry over a rewind window and recomputes the five
//! window percentages for every stock/day that has a scraped base row.
//! Updated rows are buffered and written through in fixed-size batches;
//! the row that fills a buffer is flushed with it, and a final partial
//! flush runs at completion.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    drain_one, resolve_anchor, ConcentrationCalculator, Drained, Pipeline, PipelineError,
    RefreshRequest, RefreshSummary, REFRESH_FLUSH_SIZE,
};
use crate::engine::{Job, JobQueue, RefreshJob};
use crate::sink::DataSink;
use crate::source::{date_from_offset_at, DateFormat};
use crate::telemetry::ErrorReporter;
use crate::{StakeConcentration, StockEntry};

impl Pipeline {
    /// Recompute concentration percentages for every registered stock over
    /// the request's rewind window. Days without any scraped rows are
    /// skipped, as are stocks without a base row on a given day.
    pub async fn refresh_concentration(
        &self,
        cancel: CancellationToken,
        request: RefreshRequest,
    ) -> Result<RefreshSummary, PipelineError> {
        let anchor = resolve_anchor(request.anchor);
        let stocks = self.sink().list_stocks().await?;
        info!(stocks = stocks.len(), "starting concentration refresh");

        let (result_tx, mut result_rx) = mpsc::channel::<StakeConcentration>(REFRESH_FLUSH_SIZE);
        let deadline = tokio::time::Instant::now() + request.timeout;

        let generator = RefreshGenerator {
            queue: self.queue().clone(),
            sink: self.sink(),
            reporter: self.reporter(),
            calculator: self.calculator(),
            cancel: cancel.clone(),
            request,
            anchor,
            stocks,
        };
        tokio::spawn(generator.run(result_tx));

        let mut summary = RefreshSummary::default();
        let mut buffer: Vec<StakeConcentration> = Vec::with_capacity(REFRESH_FLUSH_SIZE);
        loop {
            match drain_one(&mut result_rx, deadline, &cancel).await {
                Drained::Item(row) => {
                    buffer.push(row);
                    if buffer.len() >= REFRESH_FLUSH_SIZE {
                        self.flush(&mut buffer, &mut summary).await;
                    }
                }
                Drained::Completed => break,
                Drained::TimedOut => {
                    warn!("concentration refresh hit safety deadline");
                    summary.timed_out = true;
                    cancel.cancel();
                    break;
                }
                Drained::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
            }
        }
        // whatever arrived since the last full buffer
        self.flush(&mut buffer, &mut summary).await;

        info!(updated = summary.updated, "concentration refresh finished");
        Ok(summary)
    }

    async fn flush(&self, buffer: &mut Vec<StakeConcentration>, summary: &mut RefreshSummary) {
        if buffer.is_empty() {
            return;
        }
        let rows: Vec<StakeConcentration> = buffer.drain(..).collect();
        let count = rows.len();
        match self.sink().batch_update_stake_concentration(rows).await {
            Ok(()) => summary.updated += count,
            Err(err) => self.reporter().report(&err),
        }
    }
}

/// Job generator for one refresh run; holds a result-sender clone, so
/// the fan-in completes once it and every job have finished.
struct RefreshGenerator {
    queue: JobQueue,
    sink: Arc<dyn DataSink>,
    reporter: Arc<dyn ErrorReporter>,
    calculator: Arc<ConcentrationCalculator>,
    cancel: CancellationToken,
    request: RefreshRequest,
    anchor: chrono::NaiveDate,
    stocks: Vec<StockEntry>,
}

impl RefreshGenerator {
    async fn run(self, result_tx: mpsc::Sender<StakeConcentration>) {
        for offset in self.request.rewind_limit..=0 {
            let Some(date) =
                date_from_offset_at(self.anchor, offset, DateFormat::Concentration)
            else {
                debug!(offset, "weekend, skipping refresh day");
                continue;
            };
            // no scrape on this day means nothing to recompute
            match self.sink.has_stake_concentration(&date).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    self.reporter.report(&err);
                    continue;
                }
            }

            for stock in &self.stocks {
                let job = Job::Refresh(RefreshJob {
                    cancel: self.cancel.clone(),
                    date: date.clone(),
                    stock_id: stock.stock_id.clone(),
                    result_tx: result_tx.clone(),
                    rate_limit: self.request.rate_limit,
                    calculator: self.calculator.clone(),
                    reporter: self.reporter.clone(),
                });
                if let Err(err) = self.queue.push(job, &self.cancel).await {
                    debug!(error = %err, "refresh generation stopped");
                    return;
                }
            }
        }
    }
}
