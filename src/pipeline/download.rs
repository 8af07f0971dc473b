//! Daily batch download orchestrator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    drain_one, resolve_anchor, BatchKind, Drained, DownloadRequest, DownloadSummary, Pipeline,
    PipelineError,
};
use crate::engine::{DownloadJob, Job, JobQueue};
use crate::sink::DataSink;
use crate::source::{compact_date, date_from_offset_at, Source, CONCENTRATION_PAGES};
use crate::{Record, StakeConcentration};

/// Result-channel depth of a download fan-in.
const FAN_IN_CAPACITY: usize = 64;

impl Pipeline {
    /// Download every requested dataset family over the rewind window,
    /// fanning results into the sink. Resolves once every job has finished
    /// (or the deadline/cancellation fires).
    pub async fn batching_download(
        &self,
        cancel: CancellationToken,
        request: DownloadRequest,
    ) -> Result<DownloadSummary, PipelineError> {
        let (records_tx, mut records_rx) = mpsc::channel::<Vec<Record>>(FAN_IN_CAPACITY);
        let deadline = tokio::time::Instant::now() + request.timeout;

        let generator = Generator {
            queue: self.queue().clone(),
            fetcher: self.fetcher(),
            sink: self.sink(),
            reporter: self.reporter(),
            cancel: cancel.clone(),
            request: request.clone(),
        };
        tokio::spawn(generator.run(records_tx));

        let mut summary = DownloadSummary::default();
        loop {
            match drain_one(&mut records_rx, deadline, &cancel).await {
                Drained::Item(batch) => {
                    summary.batches += 1;
                    summary.records += batch.len();
                    if let Err(err) = self.persist_batch(batch).await {
                        self.reporter().report(&err);
                        summary.sink_failures += 1;
                    }
                }
                Drained::Completed => break,
                Drained::TimedOut => {
                    warn!("batch download hit safety deadline");
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

        info!(
            batches = summary.batches,
            records = summary.records,
            sink_failures = summary.sink_failures,
            "batch download finished"
        );
        Ok(summary)
    }

    /// Route one result batch to the sink, per record variant.
    pub(crate) async fn persist_batch(&self, batch: Vec<Record>) -> Result<(), PipelineError> {
        let mut daily_closes = Vec::new();
        let mut three_primary = Vec::new();
        let mut stocks = Vec::new();
        let mut concentrations = Vec::new();

        for record in batch {
            match record {
                Record::DailyClose(row) => daily_closes.push(row),
                Record::ThreePrimary(row) => three_primary.push(row),
                Record::Stock(row) => stocks.push(row),
                Record::Concentration(row) => concentrations.push(row),
            }
        }

        let sink = self.sink();
        if !daily_closes.is_empty() {
            sink.batch_upsert_daily_close(daily_closes).await?;
        }
        if !three_primary.is_empty() {
            sink.batch_upsert_three_primary(three_primary).await?;
        }
        if !stocks.is_empty() {
            sink.batch_upsert_stocks(stocks).await?;
        }

        // a concentration batch is one stock's five ranking pages; store
        // every slot first, then fold them into percentages right away
        let mut touched: Vec<(String, String)> = Vec::new();
        for row in concentrations {
            let key = (row.stock_id.clone(), row.date.clone());
            if !touched.contains(&key) {
                touched.push(key);
            }
            self.persist_concentration_page(row).await?;
        }
        for (stock_id, date) in touched {
            self.refresh_one(&stock_id, &date).await;
        }
        Ok(())
    }

    /// Immediate recomputation after a scrape; failures (e.g. a listing
    /// without 60 days of volume yet) are reported, not fatal.
    async fn refresh_one(&self, stock_id: &str, date: &str) {
        match self.calculator().calculate(stock_id, date).await {
            Ok(Some(updated)) => {
                if let Err(err) = self
                    .sink()
                    .batch_update_stake_concentration(vec![updated])
                    .await
                {
                    self.reporter().report(&err);
                }
            }
            Ok(None) => {}
            Err(err) => self.reporter().report(&err),
        }
    }

    /// One scraped broker-ranking row. Page 1 is the canonical aggregate
    /// and creates the stored row; every page contributes its buy/sell
    /// differential slot for the later refresh.
    async fn persist_concentration_page(
        &self,
        row: StakeConcentration,
    ) -> Result<(), PipelineError> {
        let Some(slot) = row.page.and_then(page_slot) else {
            warn!(stock = %row.stock_id, page = ?row.page, "concentration row without a known page");
            return Ok(());
        };
        let diff = row.sum_buy_shares as i64 - row.sum_sell_shares as i64;
        let sink = self.sink();

        if slot == 0 {
            let mut canonical = row.clone();
            canonical.page = None;
            sink.create_stake_concentration(canonical).await?;
        }
        sink.update_concentration_diff(&row.stock_id, &row.date, slot, diff)
            .await?;
        Ok(())
    }
}

/// Converts a broker-ranking page index into its differential slot.
fn page_slot(page: u8) -> Option<usize> {
    CONCENTRATION_PAGES.iter().position(|p| *p == page)
}

/// Job generator for one download run. Owns a clone of the result sender;
/// dropping it (and every job's clone) closes the fan-in channel.
struct Generator {
    queue: JobQueue,
    fetcher: Arc<dyn crate::crawler::Fetcher>,
    sink: Arc<dyn DataSink>,
    reporter: Arc<dyn crate::telemetry::ErrorReporter>,
    cancel: CancellationToken,
    request: DownloadRequest,
}

impl Generator {
    async fn run(self, records_tx: mpsc::Sender<Vec<Record>>) {
        let anchor = resolve_anchor(self.request.anchor);

        for offset in self.request.rewind_limit..=0 {
            for kind in &self.request.kinds {
                let scheduled = match kind {
                    BatchKind::DailyClose => {
                        self.schedule_sources(
                            &[Source::TwseDailyClose, Source::TpexDailyClose],
                            anchor,
                            offset,
                            &records_tx,
                        )
                        .await
                    }
                    BatchKind::ThreePrimary => {
                        self.schedule_sources(
                            &[Source::TwseThreePrimary, Source::TpexThreePrimary],
                            anchor,
                            offset,
                            &records_tx,
                        )
                        .await
                    }
                    BatchKind::StakeConcentration => {
                        self.schedule_concentration(anchor, offset, &records_tx).await
                    }
                };
                if !scheduled {
                    return;
                }
            }
        }
    }

    async fn schedule_sources(
        &self,
        sources: &[Source],
        anchor: chrono::NaiveDate,
        offset: i64,
        records_tx: &mpsc::Sender<Vec<Record>>,
    ) -> bool {
        for source in sources {
            let format = source.date_format().expect("dated source");
            let Some(date) = date_from_offset_at(anchor, offset, format) else {
                debug!(%source, offset, "weekend, skipping");
                continue;
            };
            let job = Job::Download(DownloadJob {
                cancel: self.cancel.clone(),
                source: *source,
                date: Some(date),
                stock_id: None,
                records_tx: records_tx.clone(),
                rate_limit: self.request.rate_limit,
                fetcher: self.fetcher.clone(),
                reporter: self.reporter.clone(),
            });
            if !self.push(job).await {
                return false;
            }
        }
        true
    }

    async fn schedule_concentration(
        &self,
        anchor: chrono::NaiveDate,
        offset: i64,
        records_tx: &mpsc::Sender<Vec<Record>>,
    ) -> bool {
        let format = Source::StakeConcentration
            .date_format()
            .expect("dated source");
        let Some(date) = date_from_offset_at(anchor, offset, format) else {
            debug!(offset, "weekend, skipping concentration");
            return true;
        };

        // candidates are stocks still missing a scraped row for this day;
        // the lookup key is the compact form of the same date
        let candidates = match self
            .sink
            .list_backfill_concentration_stock_ids(&compact_date(&date))
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                self.reporter.report(&err);
                return true;
            }
        };
        for stock_id in candidates {
            let job = Job::Download(DownloadJob {
                cancel: self.cancel.clone(),
                source: Source::StakeConcentration,
                date: Some(date.clone()),
                stock_id: Some(stock_id),
                records_tx: records_tx.clone(),
                rate_limit: self.request.rate_limit,
                fetcher: self.fetcher.clone(),
                reporter: self.reporter.clone(),
            });
            if !self.push(job).await {
                return false;
            }
        }
        true
    }

    async fn push(&self, job: Job) -> bool {
        match self.queue.push(job, &self.cancel).await {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "job generation stopped");
                false
            }
        }
    }
}
