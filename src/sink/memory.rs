//! In-memory [`DataSink`] used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DataSink, SinkError, SinkResult, DIFF_SLOTS};
use crate::source::compact_date;
use crate::{DailyClose, StakeConcentration, StockEntry, ThreePrimary, TradeVolume};

type Key = (String, String);

#[derive(Default)]
struct State {
    daily_closes: HashMap<Key, DailyClose>,
    three_primary: HashMap<Key, ThreePrimary>,
    stocks: HashMap<String, StockEntry>,
    concentrations: HashMap<Key, StakeConcentration>,
    diffs: HashMap<Key, [i64; DIFF_SLOTS]>,
}

/// Hash-map backed sink. Everything is keyed on (stock, date).
#[derive(Default)]
pub struct MemorySink {
    state: RwLock<State>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: look up one persisted daily close.
    pub async fn daily_close(&self, stock_id: &str, date: &str) -> Option<DailyClose> {
        let state = self.state.read().await;
        state
            .daily_closes
            .get(&(stock_id.to_string(), date.to_string()))
            .cloned()
    }

    /// Test helper: look up one persisted concentration row.
    pub async fn stake_concentration(
        &self,
        stock_id: &str,
        date: &str,
    ) -> Option<StakeConcentration> {
        let state = self.state.read().await;
        state
            .concentrations
            .get(&(stock_id.to_string(), date.to_string()))
            .cloned()
    }

    /// Test helper: count persisted rows per dataset.
    pub async fn counts(&self) -> (usize, usize, usize, usize) {
        let state = self.state.read().await;
        (
            state.daily_closes.len(),
            state.three_primary.len(),
            state.stocks.len(),
            state.concentrations.len(),
        )
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn batch_upsert_daily_close(&self, rows: Vec<DailyClose>) -> SinkResult<()> {
        let mut state = self.state.write().await;
        for row in rows {
            state
                .daily_closes
                .insert((row.stock_id.clone(), row.date.clone()), row);
        }
        Ok(())
    }

    async fn batch_upsert_three_primary(&self, rows: Vec<ThreePrimary>) -> SinkResult<()> {
        let mut state = self.state.write().await;
        for row in rows {
            state
                .three_primary
                .insert((row.stock_id.clone(), row.date.clone()), row);
        }
        Ok(())
    }

    async fn batch_upsert_stocks(&self, rows: Vec<StockEntry>) -> SinkResult<()> {
        let mut state = self.state.write().await;
        for row in rows {
            state.stocks.insert(row.stock_id.clone(), row);
        }
        Ok(())
    }

    async fn create_stake_concentration(&self, row: StakeConcentration) -> SinkResult<()> {
        let mut state = self.state.write().await;
        state
            .concentrations
            .insert((row.stock_id.clone(), row.date.clone()), row);
        Ok(())
    }

    async fn batch_update_stake_concentration(
        &self,
        rows: Vec<StakeConcentration>,
    ) -> SinkResult<()> {
        let mut state = self.state.write().await;
        for row in rows {
            let key = (row.stock_id.clone(), row.date.clone());
            match state.concentrations.get_mut(&key) {
                Some(existing) => {
                    existing.concentration_1 = row.concentration_1;
                    existing.concentration_5 = row.concentration_5;
                    existing.concentration_10 = row.concentration_10;
                    existing.concentration_20 = row.concentration_20;
                    existing.concentration_60 = row.concentration_60;
                }
                None => {
                    return Err(SinkError::NotFound(format!(
                        "concentration {}/{}",
                        key.0, key.1
                    )))
                }
            }
        }
        Ok(())
    }

    async fn update_concentration_diff(
        &self,
        stock_id: &str,
        date: &str,
        slot: usize,
        value: i64,
    ) -> SinkResult<()> {
        if slot >= DIFF_SLOTS {
            return Err(SinkError::Storage(format!("diff slot {slot} out of range")));
        }
        let mut state = self.state.write().await;
        let entry = state
            .diffs
            .entry((stock_id.to_string(), date.to_string()))
            .or_default();
        entry[slot] = value;
        Ok(())
    }

    async fn concentration_diff(
        &self,
        stock_id: &str,
        date: &str,
    ) -> SinkResult<[i64; DIFF_SLOTS]> {
        let state = self.state.read().await;
        Ok(state
            .diffs
            .get(&(stock_id.to_string(), date.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn get_stake_concentration(
        &self,
        stock_id: &str,
        date: &str,
    ) -> SinkResult<Option<StakeConcentration>> {
        let state = self.state.read().await;
        Ok(state
            .concentrations
            .get(&(stock_id.to_string(), date.to_string()))
            .cloned())
    }

    async fn has_stake_concentration(&self, date: &str) -> SinkResult<bool> {
        let wanted = compact_date(date);
        let state = self.state.read().await;
        Ok(state
            .concentrations
            .keys()
            .any(|(_, d)| compact_date(d) == wanted))
    }

    async fn list_backfill_concentration_stock_ids(&self, date: &str) -> SinkResult<Vec<String>> {
        let wanted = compact_date(date);
        let state = self.state.read().await;
        let mut ids: Vec<String> = state
            .stocks
            .keys()
            .filter(|id| {
                !state
                    .concentrations
                    .keys()
                    .any(|(sid, d)| sid == *id && compact_date(d) == wanted)
            })
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_stocks(&self) -> SinkResult<Vec<StockEntry>> {
        let state = self.state.read().await;
        let mut stocks: Vec<StockEntry> = state.stocks.values().cloned().collect();
        stocks.sort_by(|a, b| a.stock_id.cmp(&b.stock_id));
        Ok(stocks)
    }

    async fn concentration_volumes(
        &self,
        stock_id: &str,
        date: &str,
    ) -> SinkResult<Vec<TradeVolume>> {
        let cutoff = compact_date(date);
        let state = self.state.read().await;
        let mut volumes: Vec<TradeVolume> = state
            .daily_closes
            .iter()
            .filter(|((id, d), _)| id == stock_id && *d <= cutoff)
            .map(|((_, d), row)| TradeVolume {
                date: d.clone(),
                trade_shares: row.trade_shares,
            })
            .collect();
        volumes.sort_by(|a, b| b.date.cmp(&a.date));
        volumes.truncate(60);
        Ok(volumes)
    }
}
