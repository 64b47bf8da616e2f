//! History collection across dates and backward session windows.
//!
//! Drives [`IndexAssembler`] and the price cache to build a
//! `date -> ticker -> OHLCV` history. Empty sessions (weekends, holidays)
//! are skipped without counting toward the requested history depth; only a
//! coarser calendar-day budget bounds the search.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use super::cache::MarketCache;
use super::membership::IndexAssembler;
use super::source::MarketData;
use super::{moscow_today, normalize_date, previous_day, Ohlcv, PriceHistory};

/// Calendar-day slack on top of the requested session count when searching
/// backward.
const BACKWARD_SLACK_DAYS: usize = 30;

/// Session window the volume ranking sums over. Deliberately fixed and
/// independent of the screener's lookback.
pub const VOLUME_RANK_SESSIONS: usize = 3;

/// Collects index constituent price history, cache-first.
pub struct HistoryCollector<S> {
    source: S,
    cache: MarketCache,
    assembler: IndexAssembler,
}

impl<S: MarketData> HistoryCollector<S> {
    pub fn new(source: S, cache: MarketCache, index: impl Into<String>) -> Self {
        Self {
            source,
            cache,
            assembler: IndexAssembler::new(index),
        }
    }

    /// Collect OHLCV records for every constituent on `date`.
    ///
    /// Membership may resolve at an earlier session; candles are looked up
    /// and fetched for the requested date itself, so a non-trading date
    /// yields `{date: {}}`. Constituents without candles (halted, newly
    /// listed) are dropped. Newly fetched records are written back to the
    /// cache before returning.
    pub async fn collect_for_date(&mut self, date: NaiveDate) -> Result<PriceHistory> {
        let (resolved, tickers) = self
            .assembler
            .resolve(&self.source, &mut self.cache, &date.to_string())
            .await?;

        tracing::info!(
            date = %date,
            resolved = %resolved,
            constituents = tickers.len(),
            "Collecting constituent prices"
        );

        let mut day: BTreeMap<String, Ohlcv> = BTreeMap::new();
        let mut fetched: BTreeMap<String, Ohlcv> = BTreeMap::new();

        for ticker in &tickers {
            let cached = self
                .cache
                .price_for(date, ticker)
                .context("Failed to read price cache")?;
            if let Some(record) = cached {
                day.insert(ticker.clone(), record);
                continue;
            }

            let bars = self.source.daily_candles(ticker, date, None).await;
            if let Some(bar) = bars.first() {
                day.insert(ticker.clone(), bar.ohlcv());
                fetched.insert(ticker.clone(), bar.ohlcv());
            }
        }

        if !fetched.is_empty() {
            self.cache
                .write_prices(date, &fetched)
                .context("Failed to persist prices")?;
        }

        tracing::info!(date = %date, collected = day.len(), "Session collection complete");

        let mut result = PriceHistory::new();
        result.insert(date, day);
        Ok(result)
    }

    /// Collect every calendar day in `[start, end]` inclusive.
    ///
    /// Malformed date strings are logged and substituted with an empty
    /// result for today rather than propagated.
    pub async fn collect_range(&mut self, start: &str, end: &str) -> Result<PriceHistory> {
        let today = moscow_today();
        let (start, end) = match (
            normalize_date(start, today),
            normalize_date(end, today),
        ) {
            (Ok(start), Ok(end)) => (start, end),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Invalid range bounds");
                return Ok(today_placeholder(today));
            }
        };

        if start == end {
            return self.collect_for_date(start).await;
        }

        tracing::info!(start = %start, end = %end, "Collecting index history range");

        let mut result = PriceHistory::new();
        let mut current = start;
        while current <= end {
            let day = self.collect_for_date(current).await?;
            result.extend(day);
            current = current.succ_opt().unwrap_or(current);
        }

        tracing::info!(sessions = result.len(), "Range collection complete");
        Ok(result)
    }

    /// Collect `sessions_back + 1` trading sessions ending at `date`,
    /// walking backward one calendar day at a time.
    ///
    /// Empty sessions are skipped without consuming the session count; the
    /// total walk is bounded by `30 + sessions_back` calendar days, so the
    /// result may be shorter than requested once that budget runs out.
    /// Callers must check the result size rather than assume the depth.
    pub async fn collect_backward(
        &mut self,
        date: &str,
        sessions_back: usize,
    ) -> Result<PriceHistory> {
        let today = moscow_today();
        let mut current = match normalize_date(date, today) {
            Ok(date) => date,
            Err(e) => {
                tracing::error!(error = %e, "Invalid backfill date");
                return Ok(today_placeholder(today));
            }
        };

        tracing::info!(
            date = %current,
            sessions = sessions_back + 1,
            "Collecting trading session history"
        );

        let mut result = PriceHistory::new();
        let mut budget = BACKWARD_SLACK_DAYS + sessions_back;

        while result.len() <= sessions_back && budget > 0 {
            let day = self.collect_for_date(current).await?;

            match day.get(&current) {
                Some(records) if !records.is_empty() => {
                    result.extend(day);
                }
                _ => {
                    tracing::info!(date = %current, "Empty session, trying an earlier day");
                }
            }

            current = previous_day(current);
            budget -= 1;
        }

        tracing::info!(sessions = result.len(), "Backfill complete");
        Ok(result)
    }

    /// Rank constituents by cumulative volume over the last
    /// [`VOLUME_RANK_SESSIONS`] sessions ending at `date`, descending.
    /// Ties keep encounter order. Truncated to `top_count` when given.
    pub async fn rank_by_volume(
        &mut self,
        date: &str,
        top_count: Option<usize>,
    ) -> Result<Vec<String>> {
        let history = self.collect_backward(date, VOLUME_RANK_SESSIONS).await?;

        let mut ranked: Vec<String> = Vec::new();
        let mut totals: HashMap<String, f64> = HashMap::new();

        for records in history.values() {
            for (ticker, ohlcv) in records {
                if !totals.contains_key(ticker) {
                    ranked.push(ticker.clone());
                }
                *totals.entry(ticker.clone()).or_insert(0.0) += ohlcv.volume;
            }
        }

        // Stable sort keeps encounter order among equal volumes
        ranked.sort_by(|a, b| {
            totals[b]
                .partial_cmp(&totals[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(count) = top_count {
            ranked.truncate(count);
        }
        Ok(ranked)
    }
}

fn today_placeholder(today: NaiveDate) -> PriceHistory {
    let mut result = PriceHistory::new();
    result.insert(today, BTreeMap::new());
    result
}
