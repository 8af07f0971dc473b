//! Shared test doubles: a scripted fetcher and a counting reporter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use twstock_ingest::crawler::{FetchError, FetchResult, Fetcher};
use twstock_ingest::telemetry::ErrorReporter;

/// Routes URLs by substring to canned payloads, recording call timing and
/// concurrency along the way.
pub struct ScriptedFetcher {
    routes: Vec<(String, Bytes)>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    timestamps: Mutex<Vec<Instant>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            timestamps: Mutex::new(Vec::new()),
        }
    }

    /// Serve `payload` for any URL containing `fragment`.
    pub fn route(mut self, fragment: &str, payload: impl Into<Bytes>) -> Self {
        self.routes.push((fragment.to_string(), payload.into()));
        self
    }

    /// Hold each request open for `delay` before responding.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Request-start instants, in call order.
    pub fn timestamps(&self) -> Vec<Instant> {
        self.timestamps.lock().unwrap().clone()
    }

    /// Smallest gap between consecutive request starts.
    pub fn min_gap(&self) -> Option<Duration> {
        let timestamps = self.timestamps.lock().unwrap();
        timestamps
            .windows(2)
            .map(|w| w[1].duration_since(w[0]))
            .min()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str, _cancel: &CancellationToken) -> FetchResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timestamps.lock().unwrap().push(Instant::now());

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.routes
            .iter()
            .find(|(fragment, _)| url.contains(fragment))
            .map(|(_, payload)| payload.clone())
            .ok_or(FetchError::BadStatus(404))
    }
}

/// Counts reported failures.
#[derive(Default)]
pub struct CountingReporter {
    reports: AtomicUsize,
}

impl CountingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> usize {
        self.reports.load(Ordering::SeqCst)
    }
}

impl ErrorReporter for CountingReporter {
    fn report(&self, _err: &(dyn std::error::Error + 'static)) {
        self.reports.fetch_add(1, Ordering::SeqCst);
    }
}

/// TWSE daily-close CSV with two instrument rows.
pub const TWSE_DAILY_CLOSE_CSV: &str = "\
\"證券代號\",\"證券名稱\",\"成交股數\",\"成交筆數\",\"成交金額\",\"開盤價\",\"最高價\",\"最低價\",\"收盤價\",\"漲跌(+/-)\",\"漲跌價差\",\"最後揭示買價\",\"最後揭示買量\",\"最後揭示賣價\",\"最後揭示賣量\",\"本益比\",\"備註\"
\"2330\",\"台積電\",\"21,029,729\",\"32,610\",\"12,717,405,461\",\"606.00\",\"607.00\",\"603.00\",\"606.00\",\"+\",\"3.00\",\"605.00\",\"556\",\"606.00\",\"394\",\"26.88\",\"\"
\"2603\",\"長榮\",\"55,123,000\",\"41,022\",\"7,812,330,100\",\"141.00\",\"143.50\",\"140.00\",\"142.00\",\"+\",\"1.50\",\"141.50\",\"210\",\"142.00\",\"80\",\"9.10\",\"\"
";

/// TPEx daily-close CSV row (17 fields, quote layout differs from TWSE).
pub fn tpex_daily_close_csv() -> String {
    let mut fields = vec!["".to_string(); 17];
    fields[0] = "6488".to_string();
    fields[1] = "環球晶".to_string();
    fields[2] = "850.00".to_string(); // close
    fields[3] = "12.00".to_string(); // diff
    fields[4] = "840.00".to_string(); // open
    fields[5] = "855.00".to_string(); // high
    fields[6] = "838.00".to_string(); // low
    fields[7] = "1523000".to_string(); // shares
    fields[8] = "1290000000".to_string(); // turnover
    fields[9] = "2100".to_string(); // transactions
    format!("header,,,,,,,,,,,,,,,,\n{}\n", fields.join(","))
}

/// TWSE three-primary CSV row (19 fields).
pub fn twse_three_primary_csv() -> String {
    let mut fields = vec!["0".to_string(); 19];
    fields[0] = "2330".to_string();
    fields[1] = "台積電".to_string();
    fields[4] = "5200".to_string(); // foreign net
    fields[10] = "-300".to_string(); // trust net
    fields[11] = "120".to_string(); // dealer net
    fields[14] = "-40".to_string(); // hedging net
    format!("{}\n", fields.join(","))
}

/// TPEx three-primary CSV row (24 fields).
pub fn tpex_three_primary_csv() -> String {
    let mut fields = vec!["0".to_string(); 24];
    fields[0] = "6488".to_string();
    fields[1] = "環球晶".to_string();
    fields[10] = "900".to_string();
    fields[13] = "50".to_string();
    fields[16] = "-20".to_string();
    fields[19] = "10".to_string();
    format!("{}\n", fields.join(","))
}

/// One broker-ranking page for `stock_id` with the given totals.
pub fn concentration_page(stock_id: &str, sum_buy: u64, sum_sell: u64) -> String {
    format!(
        r#"<html><body>
<div id="oScrollHead"><table><tr><td>個股({stock_id})買賣超統計</td></tr></table></div>
<table id="oScrollFoot">
<tr><td>合計買超張數</td><td>{sum_buy}</td><td>平均買超成本</td><td>601.50</td></tr>
<tr><td>合計賣超張數</td><td>{sum_sell}</td><td>平均賣超成本</td><td>598.25</td></tr>
</table>
</body></html>"#
    )
}

/// ISIN registry page with one instrument row.
pub fn stock_list_html(stock_id: &str, name: &str) -> String {
    format!(
        "<table>\
<tr><td>有價證券代號及名稱</td><td>ISIN</td><td>上市日</td><td>市場別</td><td>產業別</td><td>CFICode</td><td>備註</td></tr>\
<tr><td>{stock_id}\u{3000}{name}</td><td>TW000{stock_id}008</td><td>1994/09/05</td><td>上市</td><td>半導體業</td><td>ESVUFR</td><td></td></tr>\
</table>"
    )
}
