//! Retry policy with configurable backoff
//!
//! Range downloads default to a fixed delay between attempts (multiplier
//! 1.0); setting a multiplier above one gives exponential backoff capped at
//! `max_backoff`.

use rand::{RngExt, rng};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts
    pub max_attempts: u32,

    /// Initial backoff duration
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(3),
            max_backoff: Duration::from_secs(30),
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create retry policy from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: std::env::var("ZSYNC_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            initial_backoff: std::env::var("ZSYNC_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.initial_backoff, Duration::from_millis),
            max_backoff: std::env::var("ZSYNC_MAX_BACKOFF")
                .ok()
                .and_then(|s| s.parse().ok())
                .map_or(defaults.max_backoff, Duration::from_secs),
            multiplier: std::env::var("ZSYNC_BACKOFF_MULTIPLIER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.multiplier),
            jitter: std::env::var("ZSYNC_RETRY_JITTER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.jitter),
        })
    }

    /// Policy with no delay between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = (self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent))
            .min(self.max_backoff.as_secs_f64().max(self.initial_backoff.as_secs_f64()));
        let mut delay = Duration::from_secs_f64(base);

        if self.jitter {
            let jitter = rng().random_range(0.0..0.3);
            #[allow(clippy::cast_precision_loss)]
            // Precision loss is acceptable for jitter calculation
            let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
            delay += Duration::from_millis(jitter_ms);
        }
        delay
    }

    /// Execute a function with retry logic
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.should_retry() || attempt >= self.max_attempts => {
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    tracing::warn!("Attempt {} failed: {}", attempt, e);
                    let delay = e
                        .retry_after_hint()
                        .unwrap_or_else(|| self.delay_for(attempt));
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(
    unsafe_code,
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::significant_drop_tightening
)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use std::sync::{Arc, Mutex};

    const ENV_VARS: [&str; 5] = [
        "ZSYNC_MAX_RETRIES",
        "ZSYNC_RETRY_BACKOFF_MS",
        "ZSYNC_MAX_BACKOFF",
        "ZSYNC_BACKOFF_MULTIPLIER",
        "ZSYNC_RETRY_JITTER",
    ];

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_secs(3));
        assert!((policy.multiplier - 1.0).abs() < f64::EPSILON);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_from_env() {
        unsafe {
            std::env::set_var("ZSYNC_MAX_RETRIES", "7");
            std::env::set_var("ZSYNC_RETRY_BACKOFF_MS", "250");
            std::env::set_var("ZSYNC_BACKOFF_MULTIPLIER", "2.0");
        }

        let policy = RetryPolicy::from_env().expect("Operation should succeed");
        assert_eq!(policy.max_attempts, 7);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);

        for var in ENV_VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_fixed_and_exponential_delays() {
        let fixed = RetryPolicy::default();
        assert_eq!(fixed.delay_for(1), Duration::from_secs(3));
        assert_eq!(fixed.delay_for(4), Duration::from_secs(3));

        let exponential = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(exponential.delay_for(1), Duration::from_secs(1));
        assert_eq!(exponential.delay_for(3), Duration::from_secs(4));
        assert_eq!(exponential.delay_for(4), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_execute_retries_transient_errors() {
        let policy = RetryPolicy::immediate(3);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    let mut count = counter.lock().expect("Operation should succeed");
                    *count += 1;
                    if *count < 3 {
                        Err(ProtocolError::Timeout)
                    } else {
                        Ok(*count)
                    }
                }
            })
            .await;

        assert_eq!(result.expect("Operation should succeed"), 3);
    }

    #[tokio::test]
    async fn test_execute_stops_on_permanent_error() {
        let policy = RetryPolicy::immediate(3);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<()> = policy
            .execute(|| {
                let counter = Arc::clone(&counter);
                async move {
                    *counter.lock().expect("Operation should succeed") += 1;
                    Err(ProtocolError::AssetNotFound("x".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(*calls.lock().expect("Operation should succeed"), 1);
    }
}
