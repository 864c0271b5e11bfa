//! Retry Policy
//!
//! Bounded retries for outbound calls. Routine sync backs off exponentially
//! (`base * 2^attempt`, capped); emergency delivery retries on a short fixed
//! pause with twice the attempts. No sleep follows the final attempt.

use std::future::Future;
use std::time::Duration;

use super::client::GatewayError;

/// Upper bound for a single backoff sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Exponential { base: Duration },
    Fixed(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn routine(retry_attempts: u32, base: Duration) -> Self {
        Self {
            attempts: retry_attempts.max(1),
            backoff: Backoff::Exponential { base },
        }
    }

    pub fn emergency(retry_attempts: u32, pause: Duration) -> Self {
        Self {
            attempts: retry_attempts.saturating_mul(2).max(1),
            backoff: Backoff::Fixed(pause),
        }
    }

    pub fn once() -> Self {
        Self {
            attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }

    /// Sleep after the failed attempt number `attempt` (0-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { base } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(MAX_BACKOFF)
            }
            Backoff::Fixed(pause) => pause,
        }
    }

    /// Run `op` until it succeeds or the attempts are used up; returns the
    /// last error on exhaustion
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    log::warn!(
                        "{} attempt {}/{} failed (kind={}): {}",
                        label,
                        attempt + 1,
                        self.attempts,
                        e.kind(),
                        e
                    );
                    if attempt + 1 >= self.attempts {
                        return Err(e);
                    }
                }
            }

            tokio::time::sleep(self.delay_after(attempt)).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::routine(3, Duration::from_secs(1));
        assert_eq!(policy.delay_after(0), Duration::from_secs(1));
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(40), MAX_BACKOFF);
    }

    #[test]
    fn test_emergency_doubles_attempts() {
        let policy = RetryPolicy::emergency(3, Duration::from_secs(1));
        assert_eq!(policy.attempts, 6);
        assert_eq!(policy.delay_after(0), policy.delay_after(4));
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::routine(0, Duration::ZERO).attempts, 1);
        assert_eq!(RetryPolicy::emergency(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test]
    async fn test_run_stops_at_attempt_limit() {
        let policy = RetryPolicy::routine(3, Duration::from_millis(5));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = policy
            .run("test", |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(GatewayError::Status(503))
                }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Status(503))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_returns_first_success() {
        let policy = RetryPolicy::routine(5, Duration::from_millis(1));

        let value = policy
            .run("test", |attempt| async move {
                if attempt < 2 {
                    Err(GatewayError::Timeout)
                } else {
                    Ok(attempt)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_no_sleep_after_last_attempt() {
        let policy = RetryPolicy::routine(1, Duration::from_secs(10));
        let started = Instant::now();

        let result: Result<(), _> = policy
            .run("test", |_| async { Err(GatewayError::Timeout) })
            .await;

        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
