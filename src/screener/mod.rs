//! Tradable-security selection.
//!
//! Orchestrates the history collector and the indicator transforms: collect
//! a backward session window, build the equal-weighted index, volume-rank
//! the universe, then keep only the securities whose correlation with the
//! index and relative activity clear the configured thresholds on the
//! requested date.

use anyhow::Result;
use chrono::NaiveDate;

use crate::config::ScreenerConfig;
use crate::data::{
    moscow_today, normalize_date, HistoryCollector, MarketCache, MarketData, PriceHistory,
};
use crate::indicators::{
    average_true_range, equal_weighted_index, relative_activity, rolling_correlation, OhlcBar,
    SeriesPoint,
};

/// ATR period used for the screening indicators. The correlation signal
/// wants raw per-session true range, not a smoothed average.
pub const SCREEN_ATR_PERIOD: usize = 1;

/// Sessions collected on top of the lookback so the correlation window is
/// full at the requested date.
const SESSION_MARGIN: usize = 3;

/// Screens index constituents down to a tradable subset.
pub struct ScreenerEngine<S> {
    collector: HistoryCollector<S>,
    config: ScreenerConfig,
}

impl<S: MarketData> ScreenerEngine<S> {
    pub fn new(source: S, cache: MarketCache, config: ScreenerConfig) -> Self {
        let collector = HistoryCollector::new(source, cache, config.index_symbol.clone());
        Self { collector, config }
    }

    /// Select tradable securities for `date` (a `YYYY-MM-DD` string, empty
    /// for today).
    ///
    /// Returns tickers in volume-rank order. The list is empty when the
    /// date string is malformed, when no history exists for the date
    /// itself, or when no security clears the thresholds. Failures of the
    /// remote source never abort the run; they only shrink the result.
    pub async fn select_tradable(&mut self, date: &str) -> Result<Vec<String>> {
        tracing::info!("Starting tradable security selection");

        let today = moscow_today();
        let date = match normalize_date(date, today) {
            Ok(date) => date,
            Err(e) => {
                tracing::error!(error = %e, "Invalid screening date");
                return Ok(Vec::new());
            }
        };

        let lookback = self.config.lookback;
        let sessions = lookback + SESSION_MARGIN;

        tracing::info!(date = %date, sessions, "Phase 1: collecting constituent history");
        let history = self
            .collector
            .collect_backward(&date.to_string(), sessions)
            .await?;

        if !history.contains_key(&date) {
            tracing::warn!(date = %date, "No trading data for the requested date");
            return Ok(Vec::new());
        }

        tracing::info!("Phase 2: building the equal-weighted index");
        let index_bars = equal_weighted_index(&history);
        let index_atr = average_true_range(&index_bars, SCREEN_ATR_PERIOD);

        tracing::info!("Phase 3: ranking constituents by volume");
        let top = self
            .collector
            .rank_by_volume(&date.to_string(), Some(self.config.target_count))
            .await?;

        tracing::info!(
            candidates = top.len(),
            "Phase 4: filtering by correlation and activity"
        );
        let mut selected = Vec::new();
        for ticker in top {
            let bars = security_bars(&history, &ticker);
            let sec_atr = average_true_range(&bars, SCREEN_ATR_PERIOD);

            let correlation = rolling_correlation(&sec_atr, &index_atr, lookback);
            let activity = relative_activity(&sec_atr, &index_atr);

            let corr_at_date = value_at(&correlation, date);
            let act_at_date = value_at(&activity, date);

            // Both values must exist exactly at the screening date; the
            // joins may have dropped it
            if let (Some(corr), Some(act)) = (corr_at_date, act_at_date) {
                tracing::debug!(
                    ticker = %ticker,
                    correlation = corr,
                    activity = act,
                    "Candidate scored"
                );
                if corr >= self.config.min_correlation && act >= self.config.min_activity {
                    selected.push(ticker);
                }
            }
        }

        tracing::info!(selected = selected.len(), "Selection complete");
        Ok(selected)
    }
}

/// Per-ticker OHLC series extracted from a collected history, ascending.
fn security_bars(history: &PriceHistory, ticker: &str) -> Vec<OhlcBar> {
    history
        .iter()
        .filter_map(|(date, records)| {
            records.get(ticker).map(|r| OhlcBar {
                date: *date,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
            })
        })
        .collect()
}

fn value_at(series: &[SeriesPoint], date: NaiveDate) -> Option<f64> {
    series.iter().find(|p| p.date == date).map(|p| p.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Ohlcv;
    use std::collections::BTreeMap;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    #[test]
    fn test_security_bars_skips_absent_dates() {
        let mut history = PriceHistory::new();
        let mut day1 = BTreeMap::new();
        day1.insert(
            "SBER".to_string(),
            Ohlcv {
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 10.0,
            },
        );
        history.insert(d(15), day1);
        history.insert(d(16), BTreeMap::new());

        let bars = security_bars(&history, "SBER");
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, d(15));
        assert!(security_bars(&history, "GAZP").is_empty());
    }

    #[test]
    fn test_value_at() {
        let series = vec![
            SeriesPoint {
                date: d(15),
                value: 0.5,
            },
            SeriesPoint {
                date: d(16),
                value: 0.7,
            },
        ];
        assert_eq!(value_at(&series, d(16)), Some(0.7));
        assert_eq!(value_at(&series, d(17)), None);
    }
}
