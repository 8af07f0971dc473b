//! Broker-concentration page extraction.
//!
//! The broker-ranking site serves server-rendered HTML tables. The page
//! header carries the stock code in parentheses ("台積電(2330)"); the table
//! footer carries four labeled aggregate cells. Rather than a full DOM
//! parse, the page is tokenized into text cells and walked with a small
//! label state machine: a numeric token is assigned to whichever labeled
//! field was seen last.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{to_decimal, to_f64, to_u64, ParseConfig, ParseError};
use crate::{Record, StakeConcentration};

const SUM_BUY: &str = "合計買超張數";
const SUM_SELL: &str = "合計賣超張數";
const AVG_BUY: &str = "平均買超成本";
const AVG_SELL: &str = "平均賣超成本";

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static STOCK_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(([0-9A-Za-z]{4,6})\)").expect("valid regex"));

/// Extract the single aggregate row of one broker-ranking page.
///
/// The returned row carries `config.page` so the fan-in can distinguish the
/// canonical page (1) from the differential-only pages (2, 3, 4, 6).
pub fn parse_concentration_page(
    config: &ParseConfig,
    text: &str,
) -> Result<Vec<Record>, ParseError> {
    let date = config
        .date
        .as_deref()
        .ok_or(ParseError::MissingDate(config.source))?;

    let stock_id = STOCK_ID_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(ParseError::EmptyResults(config.source))?;

    let mut row = StakeConcentration::empty(stock_id, date);
    row.page = config.page;

    let mut tag = "";
    for cell in TAG_RE.split(text) {
        let cell = cell.trim();
        if cell.is_empty() {
            continue;
        }
        let numeric = cell.replace(',', "");
        let as_u64 = to_u64(&numeric);
        let as_f64 = to_f64(&numeric);
        if as_u64 > 0 {
            match tag {
                SUM_BUY => row.sum_buy_shares = as_u64,
                SUM_SELL => row.sum_sell_shares = as_u64,
                _ => {}
            }
        } else if as_f64 > 0.0 {
            match tag {
                AVG_BUY => row.avg_buy_price = to_decimal(&numeric),
                AVG_SELL => row.avg_sell_price = to_decimal(&numeric),
                _ => {}
            }
        } else {
            tag = cell;
        }
    }

    if !row.validate() {
        return Err(ParseError::EmptyResults(config.source));
    }
    Ok(vec![Record::Concentration(row)])
}
