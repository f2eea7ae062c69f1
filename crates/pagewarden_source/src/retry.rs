//! Exponential-backoff retry wrapper for content-source calls.

use crate::error::SourceResult;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy: `max_attempts` total calls with delays of
/// `base`, `2*base`, `4*base`, ... between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay before the retry following attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds, exhausts the policy, or fails with a
/// non-transient error. Not-found and other permanent errors are returned
/// immediately without a retry.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    policy: RetryPolicy,
    mut op: F,
) -> SourceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    call = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient source error, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn server_error() -> SourceError {
        SourceError::Status {
            status: 500,
            message: "boom".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn two_failures_then_success_makes_three_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let started = Instant::now();

        let policy = RetryPolicy::new(Duration::from_secs(1), 4);
        let result = with_retry("list_units", policy, move || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Delays: 1s after the first failure, 2s after the second.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let result: SourceResult<()> =
            with_retry("get_partition", RetryPolicy::default(), move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SourceError::NotFound("SPACE".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(SourceError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();

        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        let result: SourceResult<()> = with_retry("list_units", policy, move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            }
        })
        .await;

        assert!(matches!(result, Err(SourceError::Status { status: 500, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_double() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 5);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }
}
