//! Index membership resolution with calendar-day backtracking.
//!
//! Composition is only published for closed trading sessions, so a request
//! for a weekend, holiday or today's date must walk backward until it finds
//! a session that actually has data, within a bounded budget. This replaces
//! the need for an external trading calendar.

use anyhow::{Context, Result};
use chrono::NaiveDate;

use super::cache::MarketCache;
use super::source::MarketData;
use super::{moscow_today, normalize_date, previous_day};

/// How many calendar days back to search before giving up.
pub const MEMBERSHIP_SEARCH_BUDGET: u32 = 30;

/// Resolves which tickers composed an index on (or nearest before) a date.
pub struct IndexAssembler {
    index: String,
}

impl IndexAssembler {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
        }
    }

    /// Resolve the membership for `date` (a `YYYY-MM-DD` string, empty for
    /// today). Returns the session the composition was actually found on
    /// together with its tickers, or an empty list when the search budget
    /// ran out.
    ///
    /// A malformed date string is an error for the caller to handle; data
    /// absence is not.
    pub async fn resolve<S: MarketData>(
        &self,
        source: &S,
        cache: &mut MarketCache,
        date: &str,
    ) -> Result<(NaiveDate, Vec<String>)> {
        let today = moscow_today();
        let requested = normalize_date(date, today)?;

        // Same-day composition is not published yet
        let mut current = if requested == today {
            previous_day(requested)
        } else {
            requested
        };

        let mut budget = MEMBERSHIP_SEARCH_BUDGET;
        let mut tickers: Vec<String> = Vec::new();
        let mut from_network = false;

        while budget > 0 && tickers.is_empty() {
            let cached = cache
                .constituents_for(current)
                .context("Failed to read membership cache")?;

            if !cached.is_empty() {
                tracing::debug!(date = %current, tickers = cached.len(), "Membership cache hit");
                tickers = cached;
                break;
            }

            tickers = source.index_constituents(&self.index, current).await;

            if tickers.is_empty() {
                tracing::info!(date = %current, "No index composition for session, stepping back");
                current = previous_day(current);
                budget -= 1;
            } else {
                from_network = true;
            }
        }

        // Only non-empty network resolutions are worth persisting
        if from_network && !tickers.is_empty() {
            cache
                .write_membership(current, requested, &tickers)
                .context("Failed to persist membership")?;
        }

        if tickers.is_empty() {
            tracing::warn!(
                requested = %requested,
                budget = MEMBERSHIP_SEARCH_BUDGET,
                "Membership search budget exhausted"
            );
        }

        Ok((current, tickers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_day() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap();
        assert_eq!(
            previous_day(date),
            NaiveDate::from_ymd_opt(2025, 9, 14).unwrap()
        );
    }
}
