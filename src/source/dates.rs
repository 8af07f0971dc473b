//! Trading-day date strings per exchange convention.
//!
//! TWSE endpoints take `YYYYMMDD`, TPEx takes ROC-calendar `yyy/mm/dd`
//! (Gregorian year minus 1911) and the concentration site takes
//! `YYYY-MM-DD`. Weekends are never trading days and yield `None`; market
//! holidays surface later as empty fetch results, not here.

use chrono::{Datelike, NaiveDate};

use super::{add_days, is_weekend, taipei_today};

/// Date-format convention of a scrape source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `YYYYMMDD`
    Twse,
    /// ROC calendar, `yyy/mm/dd`
    Tpex,
    /// `YYYY-MM-DD`
    Concentration,
}

impl DateFormat {
    fn render(&self, date: NaiveDate) -> String {
        match self {
            DateFormat::Twse => date.format("%Y%m%d").to_string(),
            DateFormat::Tpex => format!(
                "{}/{:02}/{:02}",
                date.year() - 1911,
                date.month(),
                date.day()
            ),
            DateFormat::Concentration => date.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Date string for `offset` days relative to today in Taipei, or `None` when
/// the target falls on a weekend.
pub fn date_from_offset(offset: i64, format: DateFormat) -> Option<String> {
    date_from_offset_at(taipei_today(), offset, format)
}

/// Anchored variant of [`date_from_offset`]; orchestrators pass an explicit
/// anchor so batches (and tests) are deterministic over a date range.
pub fn date_from_offset_at(anchor: NaiveDate, offset: i64, format: DateFormat) -> Option<String> {
    let target = add_days(anchor, offset);
    if is_weekend(target) {
        return None;
    }
    Some(format.render(target))
}

/// Collapse any convention back to the compact `YYYYMMDD` form used by
/// persistence lookups (e.g. backfill-candidate queries).
pub fn compact_date(input: &str) -> String {
    if let Some((year, rest)) = input.split_once('/') {
        // ROC calendar
        let year: i32 = year.parse().unwrap_or(0);
        return format!("{}{}", year + 1911, rest.replace('/', ""));
    }
    input.replace('-', "")
}
