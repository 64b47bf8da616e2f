//! Local cache for index membership and price history.
//!
//! Two CSV tables, loaded lazily on first access and rewritten in full on
//! every write. Writes union new rows with the existing table and drop
//! duplicate `(date, ticker)` keys, keeping the first occurrence, so
//! repeating a write is a no-op.
//!
//! The cache is a plain handle object owning its in-memory tables; callers
//! hold it by `&mut` and are the single writer (no cross-process locking).

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Ohlcv;

/// Cache I/O errors.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache format error: {0}")]
    Csv(#[from] csv::Error),
}

/// One membership table row: `date` is the session the composition belongs
/// to, `date_from` the originally requested date the search started at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRow {
    pub date: NaiveDate,
    pub date_from: NaiveDate,
    pub ticker: String,
}

/// One price table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub date: NaiveDate,
    pub ticker: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceRow {
    fn ohlcv(&self) -> Ohlcv {
        Ohlcv {
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Handle over the two cache tables.
pub struct MarketCache {
    membership_path: PathBuf,
    prices_path: PathBuf,
    membership: Option<Vec<MembershipRow>>,
    prices: Option<Vec<PriceRow>>,
}

impl MarketCache {
    pub fn new(membership_path: impl Into<PathBuf>, prices_path: impl Into<PathBuf>) -> Self {
        Self {
            membership_path: membership_path.into(),
            prices_path: prices_path.into(),
            membership: None,
            prices: None,
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Full membership table, loading it from disk on first access.
    pub fn membership(&mut self) -> Result<&[MembershipRow], CacheError> {
        self.ensure_membership_loaded()?;
        Ok(self.membership.get_or_insert_with(Vec::new))
    }

    /// Full price table, loading it from disk on first access.
    pub fn prices(&mut self) -> Result<&[PriceRow], CacheError> {
        self.ensure_prices_loaded()?;
        Ok(self.prices.get_or_insert_with(Vec::new))
    }

    /// Cached constituents for one session, in stored order.
    pub fn constituents_for(&mut self, date: NaiveDate) -> Result<Vec<String>, CacheError> {
        Ok(self
            .membership()?
            .iter()
            .filter(|row| row.date == date)
            .map(|row| row.ticker.clone())
            .collect())
    }

    /// Cached candle for one `(date, ticker)` key.
    pub fn price_for(
        &mut self,
        date: NaiveDate,
        ticker: &str,
    ) -> Result<Option<Ohlcv>, CacheError> {
        Ok(self
            .prices()?
            .iter()
            .find(|row| row.date == date && row.ticker == ticker)
            .map(PriceRow::ohlcv))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Merge one session's constituents into the membership table and
    /// rewrite the backing file. Idempotent per `(date, ticker)`.
    pub fn write_membership(
        &mut self,
        date: NaiveDate,
        date_from: NaiveDate,
        tickers: &[String],
    ) -> Result<(), CacheError> {
        self.ensure_membership_loaded()?;
        let path = self.membership_path.clone();
        let table = self.membership.get_or_insert_with(Vec::new);

        let mut seen: HashSet<(NaiveDate, &str)> = table
            .iter()
            .map(|row| (row.date, row.ticker.as_str()))
            .collect();
        let new_rows: Vec<MembershipRow> = tickers
            .iter()
            .filter(|ticker| seen.insert((date, ticker.as_str())))
            .map(|ticker| MembershipRow {
                date,
                date_from,
                ticker: ticker.clone(),
            })
            .collect();
        table.extend(new_rows);

        persist_rows(&path, table)
    }

    /// Merge one session's candles into the price table and rewrite the
    /// backing file. Idempotent per `(date, ticker)`.
    pub fn write_prices(
        &mut self,
        date: NaiveDate,
        records: &BTreeMap<String, Ohlcv>,
    ) -> Result<(), CacheError> {
        self.ensure_prices_loaded()?;
        let path = self.prices_path.clone();
        let table = self.prices.get_or_insert_with(Vec::new);

        let mut seen: HashSet<(NaiveDate, &str)> = table
            .iter()
            .map(|row| (row.date, row.ticker.as_str()))
            .collect();
        let new_rows: Vec<PriceRow> = records
            .iter()
            .filter(|(ticker, _)| seen.insert((date, ticker.as_str())))
            .map(|(ticker, ohlcv)| PriceRow {
                date,
                ticker: ticker.clone(),
                open: ohlcv.open,
                high: ohlcv.high,
                low: ohlcv.low,
                close: ohlcv.close,
                volume: ohlcv.volume,
            })
            .collect();
        table.extend(new_rows);

        persist_rows(&path, table)
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    fn ensure_membership_loaded(&mut self) -> Result<(), CacheError> {
        if self.membership.is_none() {
            self.membership = Some(load_rows(&self.membership_path)?);
        }
        Ok(())
    }

    fn ensure_prices_loaded(&mut self) -> Result<(), CacheError> {
        if self.prices.is_none() {
            self.prices = Some(load_rows(&self.prices_path)?);
        }
        Ok(())
    }
}

/// Read a whole table; an absent file is an empty table.
fn load_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CacheError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Rewrite a whole table.
fn persist_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
