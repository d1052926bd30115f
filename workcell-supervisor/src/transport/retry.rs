//! Connect retry policy
//!
//! Every blocking connect and every background connect batch makes exactly
//! [`MAX_RETRIES`] attempts. Between attempts the policy may wait:
//! `first_delay × 2^(attempt-1)`, capped at `max_delay`. A zero
//! `first_delay` retries immediately.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

use super::error::TransportError;

/// Attempts per connect call or per background batch
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single connect attempt
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Retries without waiting
    pub fn immediate() -> Self {
        Self {
            first_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Wait after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.first_delay.is_zero() {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        self.first_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Wait between two failed background batches
    pub fn batch_pause(&self) -> Duration {
        self.delay_for_attempt(self.max_attempts)
    }

    /// Runs `op` until it succeeds or the attempts are exhausted
    ///
    /// `attempts` is bumped once per attempt. Returns the last error when
    /// every attempt failed.
    pub async fn run<T, F, Fut>(&self, attempts: &AtomicU32, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut last_error = TransportError::Other("no attempt made".to_string());

        for attempt in 1..=self.max_attempts {
            attempts.fetch_add(1, Ordering::Relaxed);
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("Attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    last_error = e;
                }
            }

            if attempt < self.max_attempts {
                let delay = self.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let policy = RetryPolicy::immediate();
        assert_eq!(policy.delay_for_attempt(3), Duration::ZERO);
        assert_eq!(policy.batch_pause(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_run_stops_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate()
            .run(&attempts, || async { Err(TransportError::Refused) })
            .await;

        assert_eq!(result, Err(TransportError::Refused));
        assert_eq!(attempts.load(Ordering::Relaxed), MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_run_returns_first_success() {
        let attempts = AtomicU32::new(0);
        let mut calls = 0;
        let result = RetryPolicy::immediate()
            .run(&attempts, || {
                calls += 1;
                let n = calls;
                async move {
                    if n < 3 {
                        Err(TransportError::TimedOut)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }
}
