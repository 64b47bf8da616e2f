//! Logging setup for the screener.
//!
//! Structured logging via `tracing`, with either pretty console output or
//! JSON lines, and a request-id helper used to correlate all log events
//! belonging to one upstream API call.
//!
//! # Noise Filtering
//!
//! Noisy library modules (hyper, reqwest, h2, rustls, ...) are set to `warn`
//! by default so that backfill runs, which issue hundreds of HTTP requests,
//! stay readable. `RUST_LOG` overrides everything.

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Library modules filtered to `warn` level by default.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
];

/// Build the default EnvFilter with noise suppression.
fn build_filter(log_level: &str) -> EnvFilter {
    // Environment variable wins when present
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    EnvFilter::new(&directives)
}

/// Initialize logging with the given configuration.
///
/// # Arguments
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - Output format: "json" for structured JSON, "pretty" for human-readable
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        // Default to pretty format
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

/// Generate a short request id for correlating log events of one API call.
pub fn generate_request_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_modules_list() {
        assert!(NOISY_MODULES.contains(&"hyper"));
        assert!(NOISY_MODULES.contains(&"reqwest"));
        assert!(NOISY_MODULES.contains(&"rustls"));
    }

    #[test]
    fn test_generate_request_id() {
        let id1 = generate_request_id();
        let id2 = generate_request_id();
        assert_eq!(id1.len(), 8);
        assert_ne!(id1, id2);
    }
}
