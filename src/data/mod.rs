//! Market data acquisition: remote client, local cache, membership
//! resolution and history collection.
//!
//! The canonical in-memory shape exchanged between components is
//! [`PriceHistory`]: `date -> ticker -> OHLCV`. `BTreeMap` keeps iteration
//! deterministic (ascending dates, alphabetical tickers), which is the
//! "encounter order" used for stable tie-breaking in volume ranking.

pub mod cache;
pub mod collector;
pub mod membership;
pub mod moex;
pub mod retry;
pub mod source;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Europe::Moscow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{CacheError, MarketCache};
pub use collector::{HistoryCollector, VOLUME_RANK_SESSIONS};
pub use membership::{IndexAssembler, MEMBERSHIP_SEARCH_BUDGET};
pub use moex::{CandleInterval, MoexIssClient, SourceError};
pub use retry::RetryPolicy;
pub use source::MarketData;

// ============================================================================
// Core Types
// ============================================================================

/// One day's candle values for a single security.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A dated candle as returned by a market data source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl DailyBar {
    /// The candle values without the date key.
    pub fn ohlcv(&self) -> Ohlcv {
        Ohlcv {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Collected history: `date -> ticker -> OHLCV`.
pub type PriceHistory = BTreeMap<NaiveDate, BTreeMap<String, Ohlcv>>;

// ============================================================================
// Dates
// ============================================================================

/// Error for user-supplied date strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("invalid date format, expected YYYY-MM-DD: {0:?}")]
    InvalidFormat(String),
}

/// Current date in the exchange's timezone.
pub fn moscow_today() -> NaiveDate {
    chrono::Utc::now().with_timezone(&Moscow).date_naive()
}

/// One calendar day earlier, saturating at the calendar's origin.
pub(crate) fn previous_day(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(chrono::Days::new(1)).unwrap_or(date)
}

/// Parse and normalize a user-supplied date string.
///
/// An empty string means `today`. A date in the future is silently clamped
/// to `today`. Anything that is not `YYYY-MM-DD` is a format error.
pub fn normalize_date(raw: &str, today: NaiveDate) -> Result<NaiveDate, DateError> {
    if raw.is_empty() {
        return Ok(today);
    }

    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| DateError::InvalidFormat(raw.to_string()))?;

    Ok(parsed.min(today))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_normalize_empty_is_today() {
        let today = d("2025-09-18");
        assert_eq!(normalize_date("", today).unwrap(), today);
    }

    #[test]
    fn test_normalize_valid_date() {
        let today = d("2025-09-18");
        assert_eq!(normalize_date("2025-09-15", today).unwrap(), d("2025-09-15"));
    }

    #[test]
    fn test_normalize_future_clamped_to_today() {
        let today = d("2025-09-18");
        assert_eq!(normalize_date("2030-01-01", today).unwrap(), today);
    }

    #[test]
    fn test_normalize_bad_format_rejected() {
        let today = d("2025-09-18");
        assert!(normalize_date("18.09.2025", today).is_err());
        assert!(normalize_date("2025-9-18-x", today).is_err());
        assert!(normalize_date("not a date", today).is_err());
    }

    #[test]
    fn test_daily_bar_to_ohlcv() {
        let bar = DailyBar {
            date: d("2025-09-15"),
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.5,
            volume: 1000.0,
        };
        let ohlcv = bar.ohlcv();
        assert_eq!(ohlcv.close, 10.5);
        assert_eq!(ohlcv.volume, 1000.0);
    }
}
