// Upstream quote source.
//
// `QuoteSource` is the seam the quotes route calls through; `YahooQuoteSource`
// is the production implementation against Yahoo Finance's v7 quote
// endpoint.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use marketlens_core::config::QuotesConfig;

const CLIENT_USER_AGENT: &str = "Mozilla/5.0 (compatible; marketlens/0.1)";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("quote request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("quote provider returned status {status}")]
    Status { status: u16 },

    #[error("quote provider error: {0}")]
    Provider(String),

    #[error("unexpected quote response: {0}")]
    InvalidResponse(String),
}

/// One quote record as returned to dashboard clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
    pub previous_close: Option<f64>,
    pub open: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub volume: Option<u64>,
    pub market_cap: Option<u64>,
    pub currency: Option<String>,
    pub market_time: Option<DateTime<Utc>>,
}

impl Quote {
    /// A record with only the symbol set.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            name: None,
            price: None,
            change: None,
            change_percent: None,
            previous_close: None,
            open: None,
            day_high: None,
            day_low: None,
            volume: None,
            market_cap: None,
            currency: None,
            market_time: None,
        }
    }
}

#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Fetch quotes for already-normalized `symbols`. Symbols the provider
    /// does not know are omitted from the result; the rest keep request
    /// order.
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError>;
}

// ---------------------------------------------------------------------------
// Yahoo Finance
// ---------------------------------------------------------------------------

pub struct YahooQuoteSource {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl YahooQuoteSource {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            timeout,
        }
    }

    pub fn from_config(config: &QuotesConfig) -> Self {
        Self::new(
            config.provider_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, QuoteError> {
        let joined = symbols.join(",");
        debug!(symbols = %joined, "fetching quotes");

        let response = self
            .http
            .get(&self.url)
            .query(&[("symbols", joined.as_str())])
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .header(ACCEPT, "application/json")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "quote provider returned error status");
            return Err(QuoteError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let quotes = parse_yahoo_response(&body)?;
        Ok(order_by_request(quotes, symbols))
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooEnvelope {
    quote_response: YahooQuoteResponse,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteResponse {
    #[serde(default)]
    result: Vec<YahooQuote>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuote {
    symbol: String,
    short_name: Option<String>,
    long_name: Option<String>,
    regular_market_price: Option<f64>,
    regular_market_change: Option<f64>,
    regular_market_change_percent: Option<f64>,
    regular_market_previous_close: Option<f64>,
    regular_market_open: Option<f64>,
    regular_market_day_high: Option<f64>,
    regular_market_day_low: Option<f64>,
    regular_market_volume: Option<u64>,
    market_cap: Option<u64>,
    currency: Option<String>,
    regular_market_time: Option<i64>,
}

impl From<YahooQuote> for Quote {
    fn from(y: YahooQuote) -> Self {
        Quote {
            symbol: y.symbol,
            name: y.long_name.or(y.short_name),
            price: y.regular_market_price,
            change: y.regular_market_change,
            change_percent: y.regular_market_change_percent,
            previous_close: y.regular_market_previous_close,
            open: y.regular_market_open,
            day_high: y.regular_market_day_high,
            day_low: y.regular_market_day_low,
            volume: y.regular_market_volume,
            market_cap: y.market_cap,
            currency: y.currency,
            market_time: y
                .regular_market_time
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
        }
    }
}

/// Parse a v7 `quoteResponse` body.
pub(crate) fn parse_yahoo_response(body: &str) -> Result<Vec<Quote>, QuoteError> {
    let envelope: YahooEnvelope =
        serde_json::from_str(body).map_err(|e| QuoteError::InvalidResponse(e.to_string()))?;

    if let Some(err) = envelope.quote_response.error.filter(|e| !e.is_null()) {
        let message = err
            .get("description")
            .and_then(|d| d.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(QuoteError::Provider(message));
    }

    Ok(envelope
        .quote_response
        .result
        .into_iter()
        .map(Quote::from)
        .collect())
}

/// Reorder `quotes` to follow `requested`, dropping anything not asked for.
pub(crate) fn order_by_request(quotes: Vec<Quote>, requested: &[String]) -> Vec<Quote> {
    let mut by_symbol: HashMap<String, Quote> = quotes
        .into_iter()
        .map(|q| (q.symbol.to_ascii_uppercase(), q))
        .collect();
    requested
        .iter()
        .filter_map(|s| by_symbol.remove(s))
        .collect()
}
