//! Pure numeric transforms over OHLCV series.
//!
//! Everything here is synchronous and allocation-light: the inputs are the
//! collected [`PriceHistory`] or slices derived from it, the outputs are
//! dated series ready for threshold checks.

use std::collections::HashMap;

use chrono::NaiveDate;
use statrs::statistics::Statistics;

use crate::data::PriceHistory;

// ============================================================================
// Series Types
// ============================================================================

/// A dated OHLC bar without volume, used for synthetic index series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// One ATR observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtrPoint {
    pub date: NaiveDate,
    pub atr: f64,
    /// ATR as a percentage of the close.
    pub atr_percent: f64,
    /// Two-valued move direction: `+1` when the close rose against the
    /// previous session, `-1` otherwise (including flat closes and the
    /// first observation).
    pub direction: i8,
}

/// A generic dated scalar series point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

// ============================================================================
// Equal-Weighted Index
// ============================================================================

/// Build the equal-weighted index over a collected history, one bar per
/// non-empty date, ascending.
///
/// Per date and per OHLC field every price is normalized against the field
/// maximum (`price * (max / price)`) and the normalized values averaged.
/// The normalization makes every contribution equal to the maximum, so the
/// index value per field equals that maximum. The arithmetic is kept in its
/// weighted form on purpose: it is the production formula, and collapsing it
/// by hand would change behavior for degenerate inputs (zero prices).
pub fn equal_weighted_index(history: &PriceHistory) -> Vec<OhlcBar> {
    let mut bars = Vec::new();

    for (date, records) in history {
        if records.is_empty() {
            continue;
        }

        let opens: Vec<f64> = records.values().map(|r| r.open).collect();
        let highs: Vec<f64> = records.values().map(|r| r.high).collect();
        let lows: Vec<f64> = records.values().map(|r| r.low).collect();
        let closes: Vec<f64> = records.values().map(|r| r.close).collect();

        bars.push(OhlcBar {
            date: *date,
            open: weighted_mean(&opens),
            high: weighted_mean(&highs),
            low: weighted_mean(&lows),
            close: weighted_mean(&closes),
        });
    }

    bars
}

fn weighted_mean(prices: &[f64]) -> f64 {
    let max = prices.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = prices.iter().map(|price| price * (max / price)).sum();
    sum / prices.len() as f64
}

// ============================================================================
// Average True Range
// ============================================================================

/// Trailing average true range with widening-window semantics.
///
/// True range is `max(high - low, |high - prev_close|, |low - prev_close|)`;
/// the first bar has no previous close, so its true range degenerates to
/// `high - low`. The trailing mean averages over however many observations
/// are available until the window fills, so every input bar produces an
/// output point.
pub fn average_true_range(bars: &[OhlcBar], period: usize) -> Vec<AtrPoint> {
    let period = period.max(1);
    let mut true_ranges: Vec<f64> = Vec::with_capacity(bars.len());
    let mut out = Vec::with_capacity(bars.len());

    for (i, bar) in bars.iter().enumerate() {
        let tr = if i == 0 {
            bar.high - bar.low
        } else {
            let prev_close = bars[i - 1].close;
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        };
        true_ranges.push(tr);

        let window_start = (i + 1).saturating_sub(period);
        let window = &true_ranges[window_start..=i];
        let atr = window.iter().sum::<f64>() / window.len() as f64;

        let direction = if i > 0 && bar.close > bars[i - 1].close {
            1
        } else {
            -1
        };

        out.push(AtrPoint {
            date: bar.date,
            atr,
            atr_percent: atr / bar.close * 100.0,
            direction,
        });
    }

    out
}

// ============================================================================
// Rolling Correlation
// ============================================================================

/// Trailing Pearson correlation of the two series' volatility signals.
///
/// The signal is `atr_percent * direction`. Both series are inner-joined by
/// date; the first `window - 1` joined rows carry no full window and are
/// dropped, as are rows whose correlation is not finite (zero variance in
/// either window).
pub fn rolling_correlation(a: &[AtrPoint], b: &[AtrPoint], window: usize) -> Vec<SeriesPoint> {
    let window = window.max(1);
    let by_date: HashMap<NaiveDate, f64> = b.iter().map(|p| (p.date, signal(p))).collect();

    let joined: Vec<(NaiveDate, f64, f64)> = a
        .iter()
        .filter_map(|p| by_date.get(&p.date).map(|sb| (p.date, signal(p), *sb)))
        .collect();

    let mut out = Vec::new();
    for end in (window - 1)..joined.len() {
        let slice = &joined[end + 1 - window..=end];
        let xs: Vec<f64> = slice.iter().map(|(_, x, _)| *x).collect();
        let ys: Vec<f64> = slice.iter().map(|(_, _, y)| *y).collect();

        let value = pearson(&xs, &ys);
        if value.is_finite() {
            out.push(SeriesPoint {
                date: joined[end].0,
                value,
            });
        }
    }

    out
}

fn signal(point: &AtrPoint) -> f64 {
    point.atr_percent * f64::from(point.direction)
}

fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let covariance = xs.iter().covariance(ys.iter());
    let std_x = xs.iter().std_dev();
    let std_y = ys.iter().std_dev();
    covariance / (std_x * std_y)
}

// ============================================================================
// Relative Activity
// ============================================================================

/// Ratio of a security's ATR percentage to the index's, per joined date.
///
/// A zero index ATR yields an infinite or NaN ratio; such values are
/// propagated as-is and left to the caller's threshold check.
pub fn relative_activity(security: &[AtrPoint], index: &[AtrPoint]) -> Vec<SeriesPoint> {
    let by_date: HashMap<NaiveDate, f64> =
        index.iter().map(|p| (p.date, p.atr_percent)).collect();

    security
        .iter()
        .filter_map(|p| {
            by_date.get(&p.date).map(|idx| SeriesPoint {
                date: p.date,
                value: p.atr_percent / idx,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Ohlcv;
    use std::collections::BTreeMap;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, day).unwrap()
    }

    fn bar(day: u32, high: f64, low: f64, close: f64) -> OhlcBar {
        OhlcBar {
            date: d(day),
            open: (high + low) / 2.0,
            high,
            low,
            close,
        }
    }

    fn record(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Ohlcv {
        Ohlcv {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn test_ewi_equals_field_maximum() {
        let mut history = PriceHistory::new();
        let mut day = BTreeMap::new();
        day.insert("A".to_string(), record(10.0, 12.0, 9.0, 11.0, 100.0));
        day.insert("B".to_string(), record(20.0, 25.0, 18.0, 22.0, 200.0));
        day.insert("C".to_string(), record(5.0, 6.0, 4.0, 5.5, 50.0));
        history.insert(d(15), day);

        let bars = equal_weighted_index(&history);
        assert_eq!(bars.len(), 1);
        assert!((bars[0].open - 20.0).abs() < 1e-9);
        assert!((bars[0].high - 25.0).abs() < 1e-9);
        assert!((bars[0].low - 18.0).abs() < 1e-9);
        assert!((bars[0].close - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_ewi_skips_empty_dates() {
        let mut history = PriceHistory::new();
        history.insert(d(13), BTreeMap::new());
        let mut day = BTreeMap::new();
        day.insert("A".to_string(), record(10.0, 12.0, 9.0, 11.0, 100.0));
        history.insert(d(15), day);

        let bars = equal_weighted_index(&history);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, d(15));
    }

    #[test]
    fn test_atr_first_row_is_high_minus_low() {
        let bars = vec![bar(15, 12.0, 9.0, 11.0)];
        let atr = average_true_range(&bars, 1);
        assert_eq!(atr.len(), 1);
        assert!((atr[0].atr - 3.0).abs() < 1e-9);
        assert_eq!(atr[0].direction, -1);
    }

    #[test]
    fn test_atr_period_one_equals_true_range() {
        // Gap up: TR on day 2 is dominated by |high - prev_close|
        let bars = vec![bar(15, 12.0, 9.0, 11.0), bar(16, 16.0, 14.5, 15.0)];
        let atr = average_true_range(&bars, 1);
        assert!((atr[1].atr - 5.0).abs() < 1e-9); // 16.0 - 11.0
        assert_eq!(atr[1].direction, 1);
    }

    #[test]
    fn test_atr_window_widens_before_filling() {
        let bars = vec![
            bar(15, 12.0, 10.0, 11.0), // tr = 2.0
            bar(16, 13.0, 11.0, 12.0), // tr = 2.0
            bar(17, 18.0, 14.0, 16.0), // tr = max(4, 6, 2) = 6.0
            bar(18, 17.0, 15.0, 16.0), // tr = 2.0
        ];
        let atr = average_true_range(&bars, 3);
        assert!((atr[0].atr - 2.0).abs() < 1e-9);
        assert!((atr[1].atr - 2.0).abs() < 1e-9);
        assert!((atr[2].atr - 10.0 / 3.0).abs() < 1e-9);
        assert!((atr[3].atr - 10.0 / 3.0).abs() < 1e-9); // trailing 3: 2, 6, 2
    }

    #[test]
    fn test_atr_percent() {
        let bars = vec![bar(15, 12.0, 9.0, 10.0)];
        let atr = average_true_range(&bars, 1);
        assert!((atr[0].atr_percent - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_direction_is_never_zero() {
        let bars = vec![
            bar(15, 12.0, 9.0, 11.0),
            bar(16, 12.0, 9.0, 11.0), // flat close
            bar(17, 12.0, 9.0, 10.0), // down
            bar(18, 12.0, 9.0, 12.0), // up
        ];
        let atr = average_true_range(&bars, 1);
        let directions: Vec<i8> = atr.iter().map(|p| p.direction).collect();
        assert_eq!(directions, vec![-1, -1, -1, 1]);
    }

    fn varied_series(days: &[u32]) -> Vec<AtrPoint> {
        days.iter()
            .enumerate()
            .map(|(i, day)| AtrPoint {
                date: d(*day),
                atr: 1.0,
                atr_percent: 1.0 + i as f64,
                direction: if i % 2 == 0 { 1 } else { -1 },
            })
            .collect()
    }

    #[test]
    fn test_correlation_of_identical_series_is_one() {
        let series = varied_series(&[11, 12, 13, 14, 15]);
        let corr = rolling_correlation(&series, &series, 3);
        // 5 joined rows, first 2 dropped
        assert_eq!(corr.len(), 3);
        assert_eq!(corr[0].date, d(13));
        assert_eq!(corr[2].date, d(15));
        for point in &corr {
            assert!((point.value - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_correlation_of_negated_series_is_minus_one() {
        let series = varied_series(&[11, 12, 13, 14, 15]);
        let negated: Vec<AtrPoint> = series
            .iter()
            .map(|p| AtrPoint {
                direction: -p.direction,
                ..*p
            })
            .collect();
        let corr = rolling_correlation(&series, &negated, 3);
        for point in &corr {
            assert!((point.value + 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_correlation_drops_zero_variance_windows() {
        let series = varied_series(&[11, 12, 13, 14, 15]);
        // Constant signal: atr_percent identical, direction identical
        let flat: Vec<AtrPoint> = series
            .iter()
            .map(|p| AtrPoint {
                atr_percent: 2.0,
                direction: 1,
                ..*p
            })
            .collect();
        let corr = rolling_correlation(&series, &flat, 3);
        assert!(corr.is_empty());
    }

    #[test]
    fn test_correlation_inner_joins_by_date() {
        let a = varied_series(&[11, 12, 13, 14, 15]);
        let b = varied_series(&[12, 13, 14, 15, 16]);
        let corr = rolling_correlation(&a, &b, 3);
        // Joined dates: 12..=15, first 2 dropped
        assert_eq!(corr.len(), 2);
        assert_eq!(corr[0].date, d(14));
    }

    #[test]
    fn test_relative_activity_ratio() {
        let sec = varied_series(&[11, 12, 13]);
        let idx: Vec<AtrPoint> = sec
            .iter()
            .map(|p| AtrPoint {
                atr_percent: p.atr_percent / 2.0,
                ..*p
            })
            .collect();
        let activity = relative_activity(&sec, &idx);
        assert_eq!(activity.len(), 3);
        for point in &activity {
            assert!((point.value - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_relative_activity_propagates_infinite_ratio() {
        let sec = varied_series(&[11]);
        let idx = vec![AtrPoint {
            date: d(11),
            atr: 0.0,
            atr_percent: 0.0,
            direction: -1,
        }];
        let activity = relative_activity(&sec, &idx);
        assert_eq!(activity.len(), 1);
        assert!(activity[0].value.is_infinite());
    }

    #[test]
    fn test_relative_activity_inner_joins() {
        let sec = varied_series(&[11, 12]);
        let idx = varied_series(&[12, 13]);
        let activity = relative_activity(&sec, &idx);
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].date, d(12));
    }
}
