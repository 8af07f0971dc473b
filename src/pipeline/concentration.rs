//! Concentration percentage recomputation.
//!
//! The scrape phase stores, per stock/day, the canonical aggregate row and
//! a five-slot buy/sell differential (one slot per broker-ranking window:
//! 1, 5, 10, 20 and 60 days). The calculator turns each differential into
//! a percentage of the cumulative traded volume over its window.

use std::sync::Arc;

use crate::sink::{DataSink, SinkError, DIFF_SLOTS};
use crate::{StakeConcentration, TradeVolume};

/// Trading days of history the 60-day window needs.
const WINDOW_DAYS: usize = 60;

/// Volume indices at which a window closes, in slot order.
const CHECKPOINTS: [usize; DIFF_SLOTS] = [0, 4, 9, 19, 59];

/// Calculation failure.
#[derive(Debug, thiserror::Error)]
pub enum CalcError {
    /// Fewer than 60 daily volumes on record for the stock
    #[error("insufficient volume history: have {have}, need {WINDOW_DAYS}")]
    InsufficientHistory { have: usize },

    /// Sink read failed
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Recomputes concentration percentages from persisted state.
pub struct ConcentrationCalculator {
    sink: Arc<dyn DataSink>,
}

impl ConcentrationCalculator {
    pub fn new(sink: Arc<dyn DataSink>) -> Self {
        Self { sink }
    }

    /// Recompute the percentages of one stock/day. Returns `Ok(None)` when
    /// no scraped base row exists, so callers can skip silently.
    pub async fn calculate(
        &self,
        stock_id: &str,
        date: &str,
    ) -> Result<Option<StakeConcentration>, CalcError> {
        if self
            .sink
            .get_stake_concentration(stock_id, date)
            .await?
            .is_none()
        {
            return Ok(None);
        }
        let diff = self.sink.concentration_diff(stock_id, date).await?;
        let volumes = self.sink.concentration_volumes(stock_id, date).await?;
        concentration_from(stock_id, date, &diff, &volumes).map(Some)
    }
}

/// Pure calculation over an in-order (most recent first) volume series.
///
/// At each checkpoint index the window's differential is divided by the
/// cumulative traded lots (shares / 1000) and expressed as a percentage,
/// rounded to one decimal. A zero differential yields a zero percentage.
pub fn concentration_from(
    stock_id: &str,
    date: &str,
    diff: &[i64; DIFF_SLOTS],
    volumes: &[TradeVolume],
) -> Result<StakeConcentration, CalcError> {
    if volumes.len() < WINDOW_DAYS {
        return Err(CalcError::InsufficientHistory {
            have: volumes.len(),
        });
    }

    let mut row = StakeConcentration::empty(stock_id, date);
    let mut sum_trade_shares: u64 = 0;
    let mut cursor = 0;
    for (idx, volume) in volumes.iter().enumerate().take(WINDOW_DAYS) {
        sum_trade_shares += volume.trade_shares;

        if CHECKPOINTS.contains(&idx) {
            let mut pct = 0.0;
            if diff[cursor] != 0 && sum_trade_shares > 0 {
                let lots = (sum_trade_shares / 1000) as f64;
                if lots > 0.0 {
                    let p = diff[cursor] as f64 / lots * 100.0;
                    pct = (p * 10.0).round() / 10.0;
                }
            }
            match idx {
                0 => row.concentration_1 = pct,
                4 => row.concentration_5 = pct,
                9 => row.concentration_10 = pct,
                19 => row.concentration_20 = pct,
                _ => row.concentration_60 = pct,
            }
            cursor += 1;
        }
    }
    Ok(row)
}
