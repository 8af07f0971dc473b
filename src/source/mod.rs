//! Catalog of scrape targets
//!
//! Each [`Source`] maps to its URL template(s), the field capacity of the
//! rows it produces, and the date-format convention of the hosting exchange.
//! Date helpers compute offset-relative trading-day strings in the
//! Asia/Taipei timezone.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

mod dates;

pub use dates::{compact_date, date_from_offset, date_from_offset_at, DateFormat};

const TWSE_DAILY_CLOSE: &str =
    "https://www.twse.com.tw/exchangeReport/MI_INDEX?response=csv&date={date}&type=ALLBUT0999";
const TWSE_THREE_PRIMARY: &str =
    "http://www.tse.com.tw/fund/T86?response=csv&date={date}&selectType=ALLBUT0999";
const TPEX_DAILY_CLOSE: &str =
    "http://www.tpex.org.tw/web/stock/aftertrading/daily_close_quotes/stk_quote_download.php?l=zh-tw&d={date}&s=0,asc,0";
const TPEX_THREE_PRIMARY: &str =
    "http://www.tpex.org.tw/web/stock/3insti/daily_trade/3itrade_hedge_result.php?l=zh-tw&se=EW&t=D&d={date}&s=0,asc";
const TWSE_STOCK_LIST: &str = "https://isin.twse.com.tw/isin/C_public.jsp?strMode=2";
const TPEX_STOCK_LIST: &str = "https://isin.twse.com.tw/isin/C_public.jsp?strMode=4";
const CONCENTRATION_PAGE: &str =
    "https://stockchannelnew.sinotrade.com.tw/z/zc/zco/zco_{stock}_{page}.djhtm";

/// The top-15 broker list shifts day to day, so an accurate aggregate needs
/// every ranking window page. Page 5 (40-day) is not published.
pub const CONCENTRATION_PAGES: [u8; 5] = [1, 2, 3, 4, 6];

/// One URL of a job's fetch plan, with the broker-ranking page it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUrl {
    /// Fully substituted URL
    pub url: String,
    /// Broker-ranking page index, concentration sources only
    pub page: Option<u8>,
}

/// Closed enum of scrape targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// TWSE market daily closing quotes (CSV)
    TwseDailyClose,
    /// TPEx market daily closing quotes (CSV)
    TpexDailyClose,
    /// TWSE institutional buy/sell flow (CSV)
    TwseThreePrimary,
    /// TPEx institutional buy/sell flow (CSV)
    TpexThreePrimary,
    /// TWSE listed-instrument registry (HTML)
    TwseStockList,
    /// TPEx listed-instrument registry (HTML)
    TpexStockList,
    /// Per-stock broker-concentration ranking pages (HTML)
    StakeConcentration,
}

impl Source {
    /// Field capacity of a parseable row for this source; rows with fewer
    /// fields are skipped. Concentration pages are not row-shaped.
    pub fn capacity(&self) -> usize {
        match self {
            Source::TwseDailyClose | Source::TpexDailyClose => 17,
            Source::TwseThreePrimary => 19,
            Source::TpexThreePrimary => 24,
            Source::TwseStockList | Source::TpexStockList => 6,
            Source::StakeConcentration => 0,
        }
    }

    /// Date-format convention for this source, `None` for list sources.
    pub fn date_format(&self) -> Option<DateFormat> {
        match self {
            Source::TwseDailyClose | Source::TwseThreePrimary => Some(DateFormat::Twse),
            Source::TpexDailyClose | Source::TpexThreePrimary => Some(DateFormat::Tpex),
            Source::StakeConcentration => Some(DateFormat::Concentration),
            Source::TwseStockList | Source::TpexStockList => None,
        }
    }

    /// Whether jobs for this source need a per-stock entity id.
    pub fn needs_stock_id(&self) -> bool {
        matches!(self, Source::StakeConcentration)
    }

    /// Build the ordered list of URLs a job for this source must fetch.
    ///
    /// Dated sources substitute `date` into their template; list sources use
    /// a fixed URL. `StakeConcentration` enumerates one URL per
    /// broker-ranking page in [`CONCENTRATION_PAGES`].
    pub fn page_urls(&self, date: &str, stock_id: Option<&str>) -> Vec<PageUrl> {
        match self {
            Source::TwseDailyClose => vec![dated(TWSE_DAILY_CLOSE, date)],
            Source::TpexDailyClose => vec![dated(TPEX_DAILY_CLOSE, date)],
            Source::TwseThreePrimary => vec![dated(TWSE_THREE_PRIMARY, date)],
            Source::TpexThreePrimary => vec![dated(TPEX_THREE_PRIMARY, date)],
            Source::TwseStockList => vec![fixed(TWSE_STOCK_LIST)],
            Source::TpexStockList => vec![fixed(TPEX_STOCK_LIST)],
            Source::StakeConcentration => {
                let stock = stock_id.unwrap_or_default();
                CONCENTRATION_PAGES
                    .iter()
                    .map(|page| PageUrl {
                        url: CONCENTRATION_PAGE
                            .replace("{stock}", stock)
                            .replace("{page}", &page.to_string()),
                        page: Some(*page),
                    })
                    .collect()
            }
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Source::TwseDailyClose => "TwseDailyClose",
            Source::TpexDailyClose => "TpexDailyClose",
            Source::TwseThreePrimary => "TwseThreePrimary",
            Source::TpexThreePrimary => "TpexThreePrimary",
            Source::TwseStockList => "TwseStockList",
            Source::TpexStockList => "TpexStockList",
            Source::StakeConcentration => "StakeConcentration",
        };
        write!(f, "{s}")
    }
}

fn dated(template: &str, date: &str) -> PageUrl {
    PageUrl {
        url: template.replace("{date}", date),
        page: None,
    }
}

fn fixed(url: &str) -> PageUrl {
    PageUrl {
        url: url.to_string(),
        page: None,
    }
}

/// Taiwan has no daylight saving; a fixed UTC+8 offset is sufficient.
pub(crate) fn taipei_offset() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).expect("+08:00 is a valid offset")
}

/// Today's calendar date in Taipei.
pub fn taipei_today() -> NaiveDate {
    let now: DateTime<Utc> = Utc::now();
    now.with_timezone(&taipei_offset()).date_naive()
}

pub(crate) fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub(crate) fn add_days(date: NaiveDate, offset: i64) -> NaiveDate {
    date + Duration::days(offset)
}
