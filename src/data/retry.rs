//! Bounded retry with a fixed inter-attempt delay.
//!
//! Injected into the network client so tests can substitute a zero-delay
//! policy.

use std::future::Future;
use std::time::Duration;

/// Retry policy: a maximum attempt count and a fixed delay between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Policy without delays, for tests.
    pub fn no_delay(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted.
    /// Returns the last error when every attempt fails.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    attempt += 1;
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let policy = RetryPolicy::no_delay(5);
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let policy = RetryPolicy::no_delay(5);
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run(|| {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    if n < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let policy = RetryPolicy::no_delay(3);
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err("down".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::no_delay(0);
        assert_eq!(policy.max_attempts, 1);
    }
}
