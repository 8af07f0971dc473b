//! Decoding of fetched payloads into typed records.
//!
//! CSV sources (daily closes, institutional flow) go through the `csv`
//! crate with per-source column maps; the ISIN registry and the
//! broker-concentration pages are HTML and are extracted with regular
//! expressions. All sources produce [`Record`] batches.

use bytes::Bytes;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::source::{compact_date, Source};
use crate::{DailyClose, Record, ThreePrimary};

mod concentration;
mod stock_list;

pub use concentration::parse_concentration_page;
pub use stock_list::parse_stock_list;

/// Parse errors
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Payload is not valid UTF-8 (after lossy conversion produced nothing)
    #[error("undecodable payload")]
    Undecodable,

    /// A dated source was parsed without a date
    #[error("parse day missing for {0}")]
    MissingDate(Source),

    /// Nothing recognizable in the payload
    #[error("empty parsing results for {0}")]
    EmptyResults(Source),
}

/// Per-URL parse configuration, assembled by the job from its [`Source`].
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Which scrape target produced the payload
    pub source: Source,
    /// Source-format date string, `None` for list sources
    pub date: Option<String>,
    /// Declared field capacity of a parseable row
    pub capacity: usize,
    /// Broker-ranking page index, concentration sources only
    pub page: Option<u8>,
}

impl ParseConfig {
    /// Config for `source` with its declared capacity.
    pub fn new(source: Source, date: Option<String>) -> Self {
        Self {
            source,
            date,
            capacity: source.capacity(),
            page: None,
        }
    }
}

/// Decode one fetched payload into records.
pub fn parse(config: &ParseConfig, payload: &Bytes) -> Result<Vec<Record>, ParseError> {
    let text = String::from_utf8_lossy(payload);
    if text.is_empty() {
        return Err(ParseError::Undecodable);
    }

    match config.source {
        Source::TwseStockList | Source::TpexStockList => {
            parse_stock_list(config.source, &text)
        }
        Source::StakeConcentration => parse_concentration_page(config, &text),
        _ => parse_csv(config, &text),
    }
}

/// Column positions of the four net-share figures in an institutional-flow
/// row. TWSE T86 is 19 fields, the TPEx download is 24; both bury the net
/// figures between buy/sell gross columns.
struct ThreePrimaryColumns {
    foreign: usize,
    trust: usize,
    dealer: usize,
    hedging: usize,
}

const TWSE_THREE_PRIMARY_COLUMNS: ThreePrimaryColumns = ThreePrimaryColumns {
    foreign: 4,
    trust: 10,
    dealer: 11,
    hedging: 14,
};

const TPEX_THREE_PRIMARY_COLUMNS: ThreePrimaryColumns = ThreePrimaryColumns {
    foreign: 10,
    trust: 13,
    dealer: 16,
    hedging: 19,
};

fn parse_csv(config: &ParseConfig, text: &str) -> Result<Vec<Record>, ParseError> {
    let date = config
        .date
        .as_deref()
        .ok_or(ParseError::MissingDate(config.source))?;
    // normalize whatever exchange convention came in to YYYYMMDD
    let date = compact_date(date);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            // exchange CSVs mix headers, notes and data; skip what the csv
            // layer cannot shape
            Err(_) => continue,
        };
        if row.len() < config.capacity {
            continue;
        }
        let stock_id = row.get(0).unwrap_or_default().trim();
        if !looks_like_stock_id(stock_id) {
            continue;
        }

        match config.source {
            Source::TwseDailyClose => {
                records.push(Record::DailyClose(DailyClose {
                    stock_id: stock_id.to_string(),
                    date: date.clone(),
                    trade_shares: to_u64(row.get(2).unwrap_or_default()),
                    transactions: to_u64(row.get(3).unwrap_or_default()),
                    turnover: to_u64(row.get(4).unwrap_or_default()),
                    open: to_decimal(row.get(5).unwrap_or_default()),
                    high: to_decimal(row.get(6).unwrap_or_default()),
                    low: to_decimal(row.get(7).unwrap_or_default()),
                    close: to_decimal(row.get(8).unwrap_or_default()),
                    // direction sign and magnitude are split across columns
                    price_diff: to_decimal(&format!(
                        "{}{}",
                        row.get(9).unwrap_or_default().trim(),
                        row.get(10).unwrap_or_default().trim()
                    )),
                }));
            }
            Source::TpexDailyClose => {
                records.push(Record::DailyClose(DailyClose {
                    stock_id: stock_id.to_string(),
                    date: date.clone(),
                    trade_shares: to_u64(row.get(7).unwrap_or_default()),
                    transactions: to_u64(row.get(9).unwrap_or_default()),
                    turnover: to_u64(row.get(8).unwrap_or_default()),
                    open: to_decimal(row.get(4).unwrap_or_default()),
                    high: to_decimal(row.get(5).unwrap_or_default()),
                    low: to_decimal(row.get(6).unwrap_or_default()),
                    close: to_decimal(row.get(2).unwrap_or_default()),
                    price_diff: to_decimal(row.get(3).unwrap_or_default()),
                }));
            }
            Source::TwseThreePrimary => {
                records.push(three_primary_row(
                    stock_id,
                    &date,
                    &row,
                    &TWSE_THREE_PRIMARY_COLUMNS,
                ));
            }
            Source::TpexThreePrimary => {
                records.push(three_primary_row(
                    stock_id,
                    &date,
                    &row,
                    &TPEX_THREE_PRIMARY_COLUMNS,
                ));
            }
            _ => {}
        }
    }

    if records.is_empty() {
        return Err(ParseError::EmptyResults(config.source));
    }
    Ok(records)
}

fn three_primary_row(
    stock_id: &str,
    date: &str,
    row: &csv::StringRecord,
    cols: &ThreePrimaryColumns,
) -> Record {
    Record::ThreePrimary(ThreePrimary {
        stock_id: stock_id.to_string(),
        date: date.to_string(),
        foreign_trade_shares: to_i64(row.get(cols.foreign).unwrap_or_default()),
        trust_trade_shares: to_i64(row.get(cols.trust).unwrap_or_default()),
        dealer_trade_shares: to_i64(row.get(cols.dealer).unwrap_or_default()),
        hedging_trade_shares: to_i64(row.get(cols.hedging).unwrap_or_default()),
    })
}

/// Exchange codes are 4-6 characters starting with at least two digits;
/// summary and index rows never match.
pub(crate) fn looks_like_stock_id(field: &str) -> bool {
    let field = field.trim_matches(|c| c == '"' || c == '=' || c == ' ');
    if field.len() < 4 || field.len() > 6 {
        return false;
    }
    field.chars().take(2).all(|c| c.is_ascii_digit())
}

pub(crate) fn to_u64(v: &str) -> u64 {
    v.trim().replace(',', "").parse().unwrap_or(0)
}

pub(crate) fn to_i64(v: &str) -> i64 {
    v.trim().replace(',', "").parse().unwrap_or(0)
}

pub(crate) fn to_decimal(v: &str) -> Decimal {
    Decimal::from_str(&v.trim().replace(',', "")).unwrap_or(Decimal::ZERO)
}

pub(crate) fn to_f64(v: &str) -> f64 {
    v.trim().replace(',', "").parse().unwrap_or(0.0)
}
