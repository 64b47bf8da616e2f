//! MOEX ISS API client.
//!
//! Two endpoints are consumed: the paginated index-analytics endpoint
//! (composition of an index on a date) and the per-security candles
//! endpoint. Both degrade to empty results on failure; the offending
//! fully-qualified URL is logged together with a short request id.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::ApiConfig;
use crate::logging::generate_request_id;

use super::retry::RetryPolicy;
use super::source::MarketData;
use super::DailyBar;

// ============================================================================
// Errors
// ============================================================================

/// Errors of a single ISS request. Never escape the client's public API:
/// they are logged and converted to empty results.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),

    #[error("malformed response: missing column {0:?}")]
    MissingColumn(String),
}

// ============================================================================
// Wire Format
// ============================================================================

/// An ISS data block: named columns plus row-major values.
#[derive(Debug, Deserialize)]
struct IssTable {
    columns: Vec<String>,
    data: Vec<Vec<serde_json::Value>>,
}

impl IssTable {
    fn column(&self, name: &str) -> Result<usize, SourceError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| SourceError::MissingColumn(name.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct AnalyticsResponse {
    analytics: IssTable,
}

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    candles: IssTable,
}

/// Numeric cell, tolerating numbers serialized as strings.
fn cell_f64(value: &serde_json::Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// The candle `begin` column carries either a timestamp or a bare date.
fn cell_date(value: &serde_json::Value) -> Option<NaiveDate> {
    let s = value.as_str()?;
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.date())
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}

// ============================================================================
// Candle Interval
// ============================================================================

/// Candle granularity supported by the ISS candles endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleInterval {
    /// 1-10 minute candles
    Minutes(u8),
    Hourly,
    Daily,
}

impl CandleInterval {
    /// Value of the `interval` query parameter.
    pub fn as_param(&self) -> String {
        match self {
            Self::Minutes(n) => n.to_string(),
            Self::Hourly => "60".to_string(),
            Self::Daily => "24".to_string(),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Resilient ISS API client.
pub struct MoexIssClient {
    http: reqwest::Client,
    base_url: String,
    page_delay: Duration,
    retry: RetryPolicy,
}

impl MoexIssClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_delay: Duration::from_millis(config.page_delay_ms),
            retry: RetryPolicy::new(
                config.retry_attempts,
                Duration::from_millis(config.retry_delay_ms),
            ),
        })
    }

    /// Fetch all analytics pages for `index` on `date` and return the
    /// ticker column, concatenated across pages.
    ///
    /// Pagination is offset-based: pages are requested until one comes back
    /// empty. Any failure logs the full request URL and yields an empty list.
    pub async fn fetch_index_analytics(&self, index: &str, date: NaiveDate) -> Vec<String> {
        let request_id = generate_request_id();
        let endpoint = format!(
            "{}/statistics/engines/stock/markets/index/analytics/{}.json",
            self.base_url, index
        );

        let mut tickers = Vec::new();
        let mut start = 0usize;

        loop {
            let params = [
                ("date", date.to_string()),
                ("iss.meta", "off".to_string()),
                ("iss.only", "analytics".to_string()),
                ("start", start.to_string()),
            ];
            let url = match Url::parse_with_params(&endpoint, &params) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(
                        request_id = %request_id,
                        endpoint = %endpoint,
                        error = %e,
                        "Invalid analytics URL"
                    );
                    return Vec::new();
                }
            };

            match self.analytics_page(url.clone()).await {
                Ok(page) => {
                    if page.is_empty() {
                        break;
                    }
                    start += page.len();
                    tickers.extend(page);
                    if !self.page_delay.is_zero() {
                        tokio::time::sleep(self.page_delay).await;
                    }
                }
                Err(e) => {
                    tracing::error!(
                        request_id = %request_id,
                        url = %url,
                        error = %e,
                        "Index analytics request failed"
                    );
                    return Vec::new();
                }
            }
        }

        tracing::debug!(
            request_id = %request_id,
            index = %index,
            date = %date,
            tickers = tickers.len(),
            "Fetched index analytics"
        );
        tickers
    }

    async fn analytics_page(&self, url: Url) -> Result<Vec<String>, SourceError> {
        let response: AnalyticsResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let table = response.analytics;
        let ticker_col = table.column("ticker")?;

        Ok(table
            .data
            .iter()
            .filter_map(|row| row.get(ticker_col))
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect())
    }

    /// Fetch candles for one security over `[from, till]` with the given
    /// interval. `till` defaults to `from`.
    ///
    /// Retried per the configured policy; after exhausting the attempts the
    /// full URL is logged and an empty list is returned.
    pub async fn fetch_candles(
        &self,
        ticker: &str,
        from: NaiveDate,
        till: Option<NaiveDate>,
        interval: CandleInterval,
    ) -> Vec<DailyBar> {
        let request_id = generate_request_id();
        let till = till.unwrap_or(from);
        let endpoint = format!(
            "{}/engines/stock/markets/shares/securities/{}/candles.json",
            self.base_url, ticker
        );
        let params = [
            ("from", from.to_string()),
            ("till", till.to_string()),
            ("interval", interval.as_param()),
        ];

        let url = match Url::parse_with_params(&endpoint, &params) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    endpoint = %endpoint,
                    error = %e,
                    "Invalid candles URL"
                );
                return Vec::new();
            }
        };

        let result = self.retry.run(|| self.candles_request(url.clone())).await;

        match result {
            Ok(bars) => {
                tracing::debug!(
                    request_id = %request_id,
                    ticker = %ticker,
                    from = %from,
                    till = %till,
                    bars = bars.len(),
                    "Fetched candles"
                );
                bars
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    url = %url,
                    error = %e,
                    "Candles request failed after retries"
                );
                Vec::new()
            }
        }
    }

    async fn candles_request(&self, url: Url) -> Result<Vec<DailyBar>, SourceError> {
        let response: CandlesResponse = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let table = response.candles;
        let begin = table.column("begin")?;
        let open = table.column("open")?;
        let high = table.column("high")?;
        let low = table.column("low")?;
        let close = table.column("close")?;
        let volume = table.column("volume")?;

        // Rows with unparseable cells are skipped rather than failing the
        // whole response.
        let bars = table
            .data
            .iter()
            .filter_map(|row| {
                Some(DailyBar {
                    date: cell_date(row.get(begin)?)?,
                    open: cell_f64(row.get(open)?)?,
                    high: cell_f64(row.get(high)?)?,
                    low: cell_f64(row.get(low)?)?,
                    close: cell_f64(row.get(close)?)?,
                    volume: cell_f64(row.get(volume)?)?,
                })
            })
            .collect();

        Ok(bars)
    }
}

#[async_trait]
impl MarketData for MoexIssClient {
    async fn index_constituents(&self, index: &str, date: NaiveDate) -> Vec<String> {
        self.fetch_index_analytics(index, date).await
    }

    async fn daily_candles(
        &self,
        ticker: &str,
        from: NaiveDate,
        till: Option<NaiveDate>,
    ) -> Vec<DailyBar> {
        self.fetch_candles(ticker, from, till, CandleInterval::Daily)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interval_params() {
        assert_eq!(CandleInterval::Daily.as_param(), "24");
        assert_eq!(CandleInterval::Hourly.as_param(), "60");
        assert_eq!(CandleInterval::Minutes(5).as_param(), "5");
    }

    #[test]
    fn test_table_column_lookup() {
        let table = IssTable {
            columns: vec!["begin".into(), "close".into()],
            data: vec![],
        };
        assert_eq!(table.column("close").unwrap(), 1);
        assert!(matches!(
            table.column("volume"),
            Err(SourceError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_cell_f64_coercion() {
        assert_eq!(cell_f64(&json!(12.5)), Some(12.5));
        assert_eq!(cell_f64(&json!(1000)), Some(1000.0));
        assert_eq!(cell_f64(&json!("3.14")), Some(3.14));
        assert_eq!(cell_f64(&json!(null)), None);
        assert_eq!(cell_f64(&json!("abc")), None);
    }

    #[test]
    fn test_cell_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
        assert_eq!(cell_date(&json!("2025-09-15 00:00:00")), Some(expected));
        assert_eq!(cell_date(&json!("2025-09-15")), Some(expected));
        assert_eq!(cell_date(&json!("garbage")), None);
        assert_eq!(cell_date(&json!(42)), None);
    }
}
