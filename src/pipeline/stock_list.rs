//! Stock-list (ISIN registry) download orchestrator.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{drain_one, Drained, DownloadSummary, Pipeline, PipelineError, StockListRequest};
use crate::engine::{DownloadJob, Job};
use crate::source::Source;
use crate::Record;

impl Pipeline {
    /// Download both exchange registries and upsert the instrument list.
    pub async fn stock_list_download(
        &self,
        cancel: CancellationToken,
        request: StockListRequest,
    ) -> Result<DownloadSummary, PipelineError> {
        let (records_tx, mut records_rx) = mpsc::channel::<Vec<Record>>(4);
        let deadline = tokio::time::Instant::now() + request.timeout;

        for source in [Source::TwseStockList, Source::TpexStockList] {
            let job = Job::Download(DownloadJob {
                cancel: cancel.clone(),
                source,
                date: None,
                stock_id: None,
                records_tx: records_tx.clone(),
                rate_limit: request.rate_limit,
                fetcher: self.fetcher(),
                reporter: self.reporter(),
            });
            self.queue().push(job, &cancel).await?;
        }
        // only jobs hold senders now; the channel closes when both finish
        drop(records_tx);

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
                    warn!("stock-list download hit safety deadline");
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

        info!(records = summary.records, "stock-list download finished");
        Ok(summary)
    }
}
