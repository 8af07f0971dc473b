//! ISIN registry extraction.
//!
//! The `C_public.jsp` registry is one large HTML table. Each instrument row
//! has the code and name joined by a full-width space in the first cell,
//! followed by ISIN, listing date, market, industry category and CFI code.
//! Section headers ("股票", "上市認購(售)權證") and non-equity rows are
//! dropped by the stock-id shape check.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{looks_like_stock_id, ParseError};
use crate::source::Source;
use crate::{Record, StockEntry};

static ROW_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tr[^>]*>(.*?)</tr>").expect("valid regex"));
static CELL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<td[^>]*>(.*?)</td>").expect("valid regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Extract every listed instrument from a registry page.
pub fn parse_stock_list(source: Source, text: &str) -> Result<Vec<Record>, ParseError> {
    let market = match source {
        Source::TpexStockList => "TPEx",
        _ => "TwSE",
    };

    let mut records = Vec::new();
    for row in ROW_RE.captures_iter(text) {
        let cells: Vec<String> = CELL_RE
            .captures_iter(&row[1])
            .map(|c| TAG_RE.replace_all(&c[1], "").trim().to_string())
            .collect();
        if cells.len() < source.capacity() {
            continue;
        }

        // "2330　台積電" - full-width space between code and name
        let mut head = cells[0].split('\u{3000}').filter(|s| !s.is_empty());
        let (stock_id, name) = match (head.next(), head.next()) {
            (Some(id), Some(name)) => (id.trim(), name.trim()),
            _ => continue,
        };
        if !looks_like_stock_id(stock_id) {
            continue;
        }

        records.push(Record::Stock(StockEntry {
            stock_id: stock_id.to_string(),
            name: name.to_string(),
            market: market.to_string(),
            category: cells[4].clone(),
            country: "TW".to_string(),
        }));
    }

    if records.is_empty() {
        return Err(ParseError::EmptyResults(source));
    }
    Ok(records)
}
