//! One-shot CLI: screen the index universe for tradable securities.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use moex_screener::config::AppConfig;
use moex_screener::data::{MarketCache, MoexIssClient};
use moex_screener::logging::init_logging;
use moex_screener::screener::ScreenerEngine;

#[derive(Parser)]
#[command(name = "moex-screener", version, about)]
struct Cli {
    /// Path to a JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Screening date (YYYY-MM-DD); empty means today
    #[arg(long, default_value = "")]
    date: String,

    /// How many volume-ranked securities to evaluate
    #[arg(long)]
    count: Option<usize>,

    /// Correlation window in trading sessions
    #[arg(long)]
    lookback: Option<usize>,

    /// Minimum relative activity threshold
    #[arg(long)]
    min_activity: Option<f64>,

    /// Minimum correlation threshold
    #[arg(long)]
    min_correlation: Option<f64>,

    /// Log level override
    #[arg(long)]
    log_level: Option<String>,

    /// Log format override ("pretty" or "json")
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;

    if let Some(count) = cli.count {
        config.screener.target_count = count;
    }
    if let Some(lookback) = cli.lookback {
        config.screener.lookback = lookback;
    }
    if let Some(min_activity) = cli.min_activity {
        config.screener.min_activity = min_activity;
    }
    if let Some(min_correlation) = cli.min_correlation {
        config.screener.min_correlation = min_correlation;
    }

    let log_level = cli
        .log_level
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = cli
        .log_format
        .unwrap_or_else(|| config.observability.log_format.clone());
    init_logging(&log_level, &log_format);

    tracing::info!("moex-screener v{}", env!("CARGO_PKG_VERSION"));

    let client = MoexIssClient::new(&config.api)?;
    let cache = MarketCache::new(
        config.cache.membership_path.clone(),
        config.cache.prices_path.clone(),
    );

    let mut engine = ScreenerEngine::new(client, cache, config.screener.clone());
    let tickers = engine.select_tradable(&cli.date).await?;

    if tickers.is_empty() {
        println!("No tradable securities selected");
    } else {
        for ticker in &tickers {
            println!("{ticker}");
        }
    }

    Ok(())
}
