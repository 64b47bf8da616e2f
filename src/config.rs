//! Configuration for the collector and screener.
//!
//! Loaded from an optional JSON file; every field carries a compiled default
//! so an empty (or absent) file yields a working configuration pointed at the
//! production ISS endpoint.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,
    /// Local cache file locations
    #[serde(default)]
    pub cache: CacheConfig,
    /// Screening parameters
    #[serde(default)]
    pub screener: ScreenerConfig,
    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from a JSON file, or defaults when no path is given
    /// or the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        Ok(config)
    }
}

// ============================================================================
// Remote API
// ============================================================================

/// Settings for the ISS HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the ISS API
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Delay between paginated analytics requests, in milliseconds
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Maximum attempts for a single candle request
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay between retry attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            page_delay_ms: default_page_delay_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://iss.moex.com/iss".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_page_delay_ms() -> u64 {
    200
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    1000
}

// ============================================================================
// Local cache
// ============================================================================

/// Locations of the two cache tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Index membership table
    #[serde(default = "default_membership_path")]
    pub membership_path: PathBuf,
    /// Price history table
    #[serde(default = "default_prices_path")]
    pub prices_path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            membership_path: default_membership_path(),
            prices_path: default_prices_path(),
        }
    }
}

fn default_membership_path() -> PathBuf {
    PathBuf::from("db/index_membership.csv")
}

fn default_prices_path() -> PathBuf {
    PathBuf::from("db/price_history.csv")
}

// ============================================================================
// Screener
// ============================================================================

/// Parameters of the tradable-security selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    /// Index whose constituents form the screening universe
    #[serde(default = "default_index_symbol")]
    pub index_symbol: String,
    /// How many volume-ranked securities to evaluate
    #[serde(default = "default_target_count")]
    pub target_count: usize,
    /// Correlation window, in trading sessions
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Minimum relative activity (security ATR% / index ATR%)
    #[serde(default = "default_min_activity")]
    pub min_activity: f64,
    /// Minimum correlation with the index signal
    #[serde(default = "default_min_correlation")]
    pub min_correlation: f64,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            index_symbol: default_index_symbol(),
            target_count: default_target_count(),
            lookback: default_lookback(),
            min_activity: default_min_activity(),
            min_correlation: default_min_correlation(),
        }
    }
}

fn default_index_symbol() -> String {
    "IMOEX".to_string()
}

fn default_target_count() -> usize {
    20
}

fn default_lookback() -> usize {
    5
}

fn default_min_activity() -> f64 {
    1.0
}

fn default_min_correlation() -> f64 {
    0.7
}

// ============================================================================
// Observability
// ============================================================================

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
