//! # Taiwan Stock-Market Ingestion Pipeline
//!
//! A concurrent pipeline that scrapes daily Taiwan stock-exchange datasets
//! (TWSE/TPEx price closes, institutional buy/sell flow, broker-concentration
//! pages), normalizes them into typed records, and hands record batches to a
//! persistence sink.
//!
//! ## Architecture
//!
//! The crate is organized around a job/worker-pool engine:
//!
//! - [`source`] - Catalog of scrape targets: URL templates, record capacities,
//!   date-format conventions per exchange
//! - [`engine`] - Dispatcher, worker pool and the job abstraction
//! - [`crawler`] - HTTP fetch capability
//! - [`parser`] - CSV/HTML decoding into typed records
//! - [`pipeline`] - Orchestrators: batch download, stock-list download,
//!   concentration refresh, with fan-in aggregation into the sink
//! - [`sink`] - Persistence seam (async trait) plus an in-memory implementation
//! - [`lock`] - Distributed lock used to dedup scheduled runs across instances
//! - [`trigger`] - Cron-driven, lock-gated batch trigger
//!
//! Control flow: an orchestrator generates jobs for a date range and pushes
//! them onto the shared [`engine::JobQueue`]; the [`engine::Dispatcher`]
//! forwards each job to an idle worker; the job fetches and parses its pages,
//! then writes one accumulated batch to the orchestrator's result channel; a
//! fan-in task drains result channels into the [`sink::DataSink`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use twstock_ingest::crawler::HttpFetcher;
//! use twstock_ingest::engine::Engine;
//! use twstock_ingest::pipeline::{DownloadRequest, Pipeline};
//! use twstock_ingest::sink::MemorySink;
//! use twstock_ingest::telemetry::LogReporter;
//!
//! # async fn example() {
//! let (queue, engine) = Engine::start(5, 256);
//! let pipeline = Pipeline::new(
//!     queue,
//!     Arc::new(HttpFetcher::new(None)),
//!     Arc::new(MemorySink::new()),
//!     Arc::new(LogReporter),
//! );
//! let cancel = CancellationToken::new();
//! let fan_in = pipeline.batching_download(cancel, DownloadRequest::default());
//! fan_in.await.ok();
//! engine.shutdown().await;
//! # }
//! ```

#![warn(clippy::all)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod cli;
pub mod crawler;
pub mod engine;
pub mod lock;
pub mod parser;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod telemetry;
pub mod trigger;

pub use source::Source;

/// Daily closing quote for one stock on one trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyClose {
    /// Exchange stock code (e.g. "2330")
    pub stock_id: String,
    /// Trading day, `YYYYMMDD`
    pub date: String,
    /// Traded share count
    pub trade_shares: u64,
    /// Number of transactions
    pub transactions: u64,
    /// Turnover in TWD
    pub turnover: u64,
    /// Opening price
    pub open: Decimal,
    /// Day high
    pub high: Decimal,
    /// Day low
    pub low: Decimal,
    /// Closing price
    pub close: Decimal,
    /// Signed change against the previous close
    pub price_diff: Decimal,
}

impl DailyClose {
    /// Sanity-check the parsed row.
    pub fn validate(&self) -> Result<(), String> {
        if self.stock_id.is_empty() {
            return Err("stock id cannot be empty".to_string());
        }
        if self.date.is_empty() {
            return Err("date cannot be empty".to_string());
        }
        if self.high < self.low {
            return Err(format!(
                "high ({}) must be >= low ({})",
                self.high, self.low
            ));
        }
        Ok(())
    }
}

/// Institutional buy/sell flow (foreign, trust, dealer) for one stock/day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreePrimary {
    /// Exchange stock code
    pub stock_id: String,
    /// Trading day, `YYYYMMDD`
    pub date: String,
    /// Foreign investors net shares
    pub foreign_trade_shares: i64,
    /// Investment trust net shares
    pub trust_trade_shares: i64,
    /// Dealer (proprietary) net shares
    pub dealer_trade_shares: i64,
    /// Dealer hedging net shares
    pub hedging_trade_shares: i64,
}

/// One listed instrument from the exchange ISIN registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockEntry {
    /// Exchange stock code
    pub stock_id: String,
    /// Instrument name
    pub name: String,
    /// Listing market ("TwSE" or "TPEx")
    pub market: String,
    /// Industry category
    pub category: String,
    /// ISO country code
    pub country: String,
}

/// Broker-concentration aggregate for one stock/day.
///
/// Rows scraped from a broker-ranking page carry the page index in `page`;
/// the fan-in uses it to pick the canonical row (page 1) and to build the
/// per-page buy/sell differential array. Persisted rows have `page == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakeConcentration {
    /// Exchange stock code
    pub stock_id: String,
    /// Trading day, `YYYY-MM-DD`
    pub date: String,
    /// Broker-ranking page this row was scraped from (1, 2, 3, 4 or 6)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u8>,
    /// Total shares bought by the top brokers (lots)
    pub sum_buy_shares: u64,
    /// Total shares sold by the top brokers (lots)
    pub sum_sell_shares: u64,
    /// Average buy price
    pub avg_buy_price: Decimal,
    /// Average sell price
    pub avg_sell_price: Decimal,
    /// 1-day concentration percentage
    pub concentration_1: f64,
    /// 5-day concentration percentage
    pub concentration_5: f64,
    /// 10-day concentration percentage
    pub concentration_10: f64,
    /// 20-day concentration percentage
    pub concentration_20: f64,
    /// 60-day concentration percentage
    pub concentration_60: f64,
}

impl StakeConcentration {
    /// A scraped row is usable once it carries the id, date and both totals.
    pub fn validate(&self) -> bool {
        !self.stock_id.is_empty()
            && !self.date.is_empty()
            && (self.sum_buy_shares > 0 || self.sum_sell_shares > 0)
    }

    /// Empty aggregate for (stock, date); used by the scraper and calculator.
    pub fn empty(stock_id: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            stock_id: stock_id.into(),
            date: date.into(),
            page: None,
            sum_buy_shares: 0,
            sum_sell_shares: 0,
            avg_buy_price: Decimal::ZERO,
            avg_sell_price: Decimal::ZERO,
            concentration_1: 0.0,
            concentration_5: 0.0,
            concentration_10: 0.0,
            concentration_20: 0.0,
            concentration_60: 0.0,
        }
    }
}

/// Daily traded volume row, input to the concentration calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeVolume {
    /// Trading day, most recent first in calculator input
    pub date: String,
    /// Traded share count
    pub trade_shares: u64,
}

/// Heterogeneous parsed record, the element type of a job's result batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Daily closing quote
    DailyClose(DailyClose),
    /// Institutional flow row
    ThreePrimary(ThreePrimary),
    /// Stock-list entry
    Stock(StockEntry),
    /// Broker-concentration page row
    Concentration(StakeConcentration),
}

impl Record {
    /// Extract a daily close, discarding other variants.
    pub fn into_daily_close(self) -> Option<DailyClose> {
        match self {
            Record::DailyClose(v) => Some(v),
            _ => None,
        }
    }

    /// Extract a three-primary row, discarding other variants.
    pub fn into_three_primary(self) -> Option<ThreePrimary> {
        match self {
            Record::ThreePrimary(v) => Some(v),
            _ => None,
        }
    }

    /// Extract a stock-list entry, discarding other variants.
    pub fn into_stock(self) -> Option<StockEntry> {
        match self {
            Record::Stock(v) => Some(v),
            _ => None,
        }
    }

    /// Extract a concentration row, discarding other variants.
    pub fn into_concentration(self) -> Option<StakeConcentration> {
        match self {
            Record::Concentration(v) => Some(v),
            _ => None,
        }
    }
}
