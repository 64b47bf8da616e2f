//! Market data source abstraction.
//!
//! The collector and screener only depend on this trait, so tests can
//! substitute in-memory fixtures for the HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use super::DailyBar;

/// A source of index composition and daily candle data.
///
/// Degradation contract: implementations never fail. Transient network or
/// payload errors are logged by the implementation and surface to callers as
/// an empty vector, which callers treat as "no data", not as fatal.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Tickers composing `index` on `date`, in source order.
    /// Empty when the date has no published composition (weekend, holiday)
    /// or the request failed.
    async fn index_constituents(&self, index: &str, date: NaiveDate) -> Vec<String>;

    /// Daily candles for `ticker` over `[from, till]` inclusive.
    /// `till` defaults to `from`. Empty when the security did not trade in
    /// the range or the request failed.
    async fn daily_candles(
        &self,
        ticker: &str,
        from: NaiveDate,
        till: Option<NaiveDate>,
    ) -> Vec<DailyBar>;
}

#[async_trait]
impl<S: MarketData + ?Sized> MarketData for Arc<S> {
    async fn index_constituents(&self, index: &str, date: NaiveDate) -> Vec<String> {
        (**self).index_constituents(index, date).await
    }

    async fn daily_candles(
        &self,
        ticker: &str,
        from: NaiveDate,
        till: Option<NaiveDate>,
    ) -> Vec<DailyBar> {
        (**self).daily_candles(ticker, from, till).await
    }
}
