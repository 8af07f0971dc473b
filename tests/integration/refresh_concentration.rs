//! Integration tests for the concentration refresh flow.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use twstock_ingest::engine::Engine;
use twstock_ingest::pipeline::{Pipeline, RefreshRequest};
use twstock_ingest::sink::{DataSink, MemorySink, SinkResult, DIFF_SLOTS};
use twstock_ingest::{DailyClose, StakeConcentration, StockEntry, ThreePrimary, TradeVolume};

use crate::common::{CountingReporter, ScriptedFetcher};

fn wednesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 5).unwrap()
}

fn request(anchor: NaiveDate) -> RefreshRequest {
    RefreshRequest {
        rewind_limit: 0,
        rate_limit: Duration::ZERO,
        timeout: Duration::from_secs(10),
        anchor: Some(anchor),
    }
}

fn close(stock_id: &str, date: &str, shares: u64) -> DailyClose {
    use rust_decimal::Decimal;
    DailyClose {
        stock_id: stock_id.to_string(),
        date: date.to_string(),
        trade_shares: shares,
        transactions: 1,
        turnover: 1,
        open: Decimal::ONE,
        high: Decimal::ONE,
        low: Decimal::ONE,
        close: Decimal::ONE,
        price_diff: Decimal::ZERO,
    }
}

fn entry(stock_id: &str) -> StockEntry {
    StockEntry {
        stock_id: stock_id.to_string(),
        name: "公司".to_string(),
        market: "TwSE".to_string(),
        category: "半導體業".to_string(),
        country: "TW".to_string(),
    }
}

/// Register the stock and seed `days` of volume history plus the scraped
/// base row and diff slots for (stock, date).
async fn seed_on(sink: &MemorySink, stock_id: &str, days: usize, date: &str) {
    sink.batch_upsert_stocks(vec![entry(stock_id)]).await.unwrap();
    let closes = (1..=days)
        .map(|d| close(stock_id, &format!("202112{d:02}"), 1_000_000))
        .collect();
    sink.batch_upsert_daily_close(closes).await.unwrap();
    sink.create_stake_concentration(StakeConcentration::empty(stock_id, date))
        .await
        .unwrap();
    for slot in 0..5 {
        sink.update_concentration_diff(stock_id, date, slot, 350)
            .await
            .unwrap();
    }
}

async fn seed(sink: &MemorySink, stock_id: &str, days: usize) {
    seed_on(sink, stock_id, days, "2022-01-05").await;
}

struct Harness {
    pipeline: Pipeline,
    sink: Arc<MemorySink>,
    reporter: Arc<CountingReporter>,
    engine: Engine,
}

fn harness() -> Harness {
    let (queue, engine) = Engine::start(3, 64);
    let sink = Arc::new(MemorySink::new());
    let reporter = Arc::new(CountingReporter::new());
    let pipeline = Pipeline::new(
        queue,
        Arc::new(ScriptedFetcher::new()),
        sink.clone(),
        reporter.clone(),
    );
    Harness {
        pipeline,
        sink,
        reporter,
        engine,
    }
}

/// Delegates to a [`MemorySink`] while recording the size of every
/// percentage write-through batch.
struct FlushTrackingSink {
    inner: MemorySink,
    update_batches: Mutex<Vec<usize>>,
}

impl FlushTrackingSink {
    fn new() -> Self {
        Self {
            inner: MemorySink::new(),
            update_batches: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl DataSink for FlushTrackingSink {
    async fn batch_upsert_daily_close(&self, rows: Vec<DailyClose>) -> SinkResult<()> {
        self.inner.batch_upsert_daily_close(rows).await
    }

    async fn batch_upsert_three_primary(&self, rows: Vec<ThreePrimary>) -> SinkResult<()> {
        self.inner.batch_upsert_three_primary(rows).await
    }

    async fn batch_upsert_stocks(&self, rows: Vec<StockEntry>) -> SinkResult<()> {
        self.inner.batch_upsert_stocks(rows).await
    }

    async fn create_stake_concentration(&self, row: StakeConcentration) -> SinkResult<()> {
        self.inner.create_stake_concentration(row).await
    }

    async fn batch_update_stake_concentration(
        &self,
        rows: Vec<StakeConcentration>,
    ) -> SinkResult<()> {
        self.update_batches.lock().unwrap().push(rows.len());
        self.inner.batch_update_stake_concentration(rows).await
    }

    async fn update_concentration_diff(
        &self,
        stock_id: &str,
        date: &str,
        slot: usize,
        value: i64,
    ) -> SinkResult<()> {
        self.inner
            .update_concentration_diff(stock_id, date, slot, value)
            .await
    }

    async fn concentration_diff(
        &self,
        stock_id: &str,
        date: &str,
    ) -> SinkResult<[i64; DIFF_SLOTS]> {
        self.inner.concentration_diff(stock_id, date).await
    }

    async fn get_stake_concentration(
        &self,
        stock_id: &str,
        date: &str,
    ) -> SinkResult<Option<StakeConcentration>> {
        self.inner.get_stake_concentration(stock_id, date).await
    }

    async fn has_stake_concentration(&self, date: &str) -> SinkResult<bool> {
        self.inner.has_stake_concentration(date).await
    }

    async fn list_backfill_concentration_stock_ids(&self, date: &str) -> SinkResult<Vec<String>> {
        self.inner.list_backfill_concentration_stock_ids(date).await
    }

    async fn list_stocks(&self) -> SinkResult<Vec<StockEntry>> {
        self.inner.list_stocks().await
    }

    async fn concentration_volumes(
        &self,
        stock_id: &str,
        date: &str,
    ) -> SinkResult<Vec<TradeVolume>> {
        self.inner.concentration_volumes(stock_id, date).await
    }
}

#[tokio::test]
async fn test_full_buffer_flushes_mid_run() {
    let (queue, engine) = Engine::start(3, 128);
    let sink = Arc::new(FlushTrackingSink::new());
    let reporter = Arc::new(CountingReporter::new());
    let pipeline = Pipeline::new(
        queue,
        Arc::new(ScriptedFetcher::new()),
        sink.clone(),
        reporter.clone(),
    );

    // one more candidate than the buffer holds
    for i in 0..51 {
        seed_on(&sink.inner, &format!("{}", 1100 + i), 60, "2022-01-05").await;
    }

    let summary = pipeline
        .refresh_concentration(CancellationToken::new(), request(wednesday()))
        .await
        .unwrap();
    assert_eq!(summary.updated, 51);
    assert_eq!(reporter.reports(), 0);

    // the 50th buffered row triggers a write-through mid-run; the
    // remainder flushes at completion
    let batches = sink.update_batches.lock().unwrap().clone();
    assert_eq!(batches, vec![50, 1]);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_refresh_recomputes_percentages() {
    let h = harness();
    seed(&h.sink, "2330", 60).await;

    let summary = h
        .pipeline
        .refresh_concentration(CancellationToken::new(), request(wednesday()))
        .await
        .unwrap();
    assert_eq!(summary.updated, 1);

    // constant 1000-lot days: 350 over 1k/5k/10k/20k/60k lots
    let row = h
        .sink
        .stake_concentration("2330", "2022-01-05")
        .await
        .unwrap();
    assert_eq!(row.concentration_1, 35.0);
    assert_eq!(row.concentration_5, 7.0);
    assert_eq!(row.concentration_10, 3.5);
    assert_eq!(row.concentration_20, 1.8);
    assert_eq!(row.concentration_60, 0.6);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_partial_buffer_flushes_at_completion() {
    let h = harness();
    for stock_id in ["1101", "2330", "2603"] {
        seed(&h.sink, stock_id, 60).await;
    }

    let summary = h
        .pipeline
        .refresh_concentration(CancellationToken::new(), request(wednesday()))
        .await
        .unwrap();
    assert_eq!(summary.updated, 3);
    for stock_id in ["1101", "2330", "2603"] {
        let row = h
            .sink
            .stake_concentration(stock_id, "2022-01-05")
            .await
            .unwrap();
        assert_eq!(row.concentration_1, 35.0);
    }

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_insufficient_history_is_reported_and_skipped() {
    let h = harness();
    seed(&h.sink, "2330", 60).await;
    // a recent listing without 60 days of volume
    seed(&h.sink, "6988", 10).await;

    let summary = h
        .pipeline
        .refresh_concentration(CancellationToken::new(), request(wednesday()))
        .await
        .unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(h.reporter.reports(), 1);
    let stale = h
        .sink
        .stake_concentration("6988", "2022-01-05")
        .await
        .unwrap();
    assert_eq!(stale.concentration_60, 0.0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_stock_without_base_row_is_skipped_silently() {
    let h = harness();
    seed(&h.sink, "2330", 60).await;
    // registered but never scraped on the day
    h.sink.batch_upsert_stocks(vec![entry("2603")]).await.unwrap();

    let summary = h
        .pipeline
        .refresh_concentration(CancellationToken::new(), request(wednesday()))
        .await
        .unwrap();

    assert_eq!(summary.updated, 1);
    assert_eq!(h.reporter.reports(), 0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_rewind_covers_each_scraped_day() {
    let h = harness();
    // rows on Tuesday the 4th and Wednesday the 5th
    seed_on(&h.sink, "2330", 60, "2022-01-04").await;
    seed_on(&h.sink, "2330", 60, "2022-01-05").await;

    let mut req = request(wednesday());
    req.rewind_limit = -1;
    let summary = h
        .pipeline
        .refresh_concentration(CancellationToken::new(), req)
        .await
        .unwrap();
    assert_eq!(summary.updated, 2);

    for date in ["2022-01-04", "2022-01-05"] {
        let row = h.sink.stake_concentration("2330", date).await.unwrap();
        assert_eq!(row.concentration_1, 35.0);
    }

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_day_without_scrape_generates_no_jobs() {
    let h = harness();
    h.sink.batch_upsert_stocks(vec![entry("2330")]).await.unwrap();

    let summary = h
        .pipeline
        .refresh_concentration(CancellationToken::new(), request(wednesday()))
        .await
        .unwrap();
    assert_eq!(summary.updated, 0);
    assert_eq!(h.reporter.reports(), 0);

    h.engine.shutdown().await;
}

#[tokio::test]
async fn test_weekend_is_a_noop() {
    let h = harness();
    seed(&h.sink, "2330", 60).await;

    let saturday = NaiveDate::from_ymd_opt(2022, 1, 8).unwrap();
    let summary = h
        .pipeline
        .refresh_concentration(CancellationToken::new(), request(saturday))
        .await
        .unwrap();
    assert_eq!(summary.updated, 0);

    h.engine.shutdown().await;
}
