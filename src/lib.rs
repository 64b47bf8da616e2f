//! MOEX index history collector and volatility screener.
//!
//! The pipeline, leaf-first:
//!
//! ```text
//! MoexIssClient ──> MarketCache ──> IndexAssembler ──> HistoryCollector
//!        (HTTP)       (two CSV          (calendar          (date / range /
//!                      tables)          backtracking)       backward windows)
//!                                                               │
//!                     indicators (EWI, ATR, correlation) <──────┘
//!                                                               │
//!                                    ScreenerEngine::select_tradable
//! ```
//!
//! Network failures degrade to empty results and log lines; the screener
//! never sees an error from the data layer, only smaller result sets.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod data;
pub mod indicators;
pub mod logging;
pub mod screener;
