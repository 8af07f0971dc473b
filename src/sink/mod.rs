//! Persistence seam.
//!
//! Orchestrators talk to storage exclusively through [`DataSink`], so the
//! pipeline is testable without a database and deployments can plug in
//! whatever store they run. The crate ships [`MemorySink`] for tests and
//! dry runs.

use async_trait::async_trait;

use crate::{DailyClose, StakeConcentration, StockEntry, ThreePrimary, TradeVolume};

mod memory;

pub use memory::MemorySink;

/// Slots of the per-page buy/sell differential array: pages 1, 2, 3, 4, 6
/// map to indices 0..5.
pub const DIFF_SLOTS: usize = 5;

/// Sink failure.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Backing store rejected the operation
    #[error("storage error: {0}")]
    Storage(String),

    /// Referenced row does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Storage collaborator for every dataset the pipeline produces.
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Upsert a batch of daily closing quotes.
    async fn batch_upsert_daily_close(&self, rows: Vec<DailyClose>) -> SinkResult<()>;

    /// Upsert a batch of institutional-flow rows.
    async fn batch_upsert_three_primary(&self, rows: Vec<ThreePrimary>) -> SinkResult<()>;

    /// Upsert a batch of stock-list entries.
    async fn batch_upsert_stocks(&self, rows: Vec<StockEntry>) -> SinkResult<()>;

    /// Insert the canonical (page 1) concentration row for a stock/day.
    async fn create_stake_concentration(&self, row: StakeConcentration) -> SinkResult<()>;

    /// Update previously created concentration rows with computed
    /// percentages.
    async fn batch_update_stake_concentration(
        &self,
        rows: Vec<StakeConcentration>,
    ) -> SinkResult<()>;

    /// Record one slot of the per-page buy/sell differential for a
    /// stock/day. `slot` is the index in the pages array, 0..[`DIFF_SLOTS`].
    async fn update_concentration_diff(
        &self,
        stock_id: &str,
        date: &str,
        slot: usize,
        value: i64,
    ) -> SinkResult<()>;

    /// The stored differential array for a stock/day.
    async fn concentration_diff(&self, stock_id: &str, date: &str)
        -> SinkResult<[i64; DIFF_SLOTS]>;

    /// The concentration row for a stock/day, if one has been scraped.
    async fn get_stake_concentration(
        &self,
        stock_id: &str,
        date: &str,
    ) -> SinkResult<Option<StakeConcentration>>;

    /// Whether any concentration rows exist for `date` at all. Refresh
    /// generation skips days with no scrape.
    async fn has_stake_concentration(&self, date: &str) -> SinkResult<bool>;

    /// Stock ids from the registry still missing a concentration row on
    /// `date` (compact `YYYYMMDD`).
    async fn list_backfill_concentration_stock_ids(&self, date: &str) -> SinkResult<Vec<String>>;

    /// All known listed instruments.
    async fn list_stocks(&self) -> SinkResult<Vec<StockEntry>>;

    /// Daily traded volumes for a stock up to and including `date`
    /// (compact `YYYYMMDD`), most recent first, at most 60 rows.
    async fn concentration_volumes(&self, stock_id: &str, date: &str)
        -> SinkResult<Vec<TradeVolume>>;
}
