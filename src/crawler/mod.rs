//! HTTP fetch capability.
//!
//! Exchanges serve plain GET endpoints; the interesting part is the error
//! taxonomy (network vs bad status vs body decode) and cancellation, which
//! jobs rely on to abort cleanly mid-batch.

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fetch errors, distinguishable by failure class.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection/transport failure
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("bad status: {0}")]
    BadStatus(u16),

    /// Body could not be read
    #[error("decode error: {0}")]
    Decode(String),

    /// The governing context was cancelled mid-request
    #[error("fetch cancelled")]
    Cancelled,
}

/// Result type for fetch operations
pub type FetchResult<T> = Result<T, FetchError>;

/// Opaque fetch capability: one URL in, raw bytes out.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `url`, honoring `cancel` while the request is in flight.
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> FetchResult<Bytes>;
}

/// Production fetcher over a shared `reqwest` client.
///
/// An optional proxy prefix routes requests through a scraping proxy: the
/// target URL is query-escaped and appended, matching the upstream proxy
/// contract (`{proxy}&url={escaped}`).
pub struct HttpFetcher {
    client: reqwest::Client,
    proxy_prefix: Option<String>,
}

impl HttpFetcher {
    /// Build a fetcher with a 60 second request timeout.
    pub fn new(proxy_prefix: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default();
        Self {
            client,
            proxy_prefix,
        }
    }

    fn request_url(&self, url: &str) -> String {
        match &self.proxy_prefix {
            Some(prefix) => format!("{prefix}&url={}", urlescape(url)),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> FetchResult<Bytes> {
        let uri = self.request_url(url);
        debug!(%uri, "fetching");

        let response = tokio::select! {
            res = self.client.get(&uri).send() => {
                res.map_err(|e| FetchError::Network(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let bytes = tokio::select! {
            res = response.bytes() => {
                res.map_err(|e| FetchError::Decode(e.to_string()))?
            }
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        Ok(bytes)
    }
}

/// Minimal query escaping for the proxy passthrough URL.
fn urlescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}
