//! Bounded exponential-backoff retry.
//!
//! [`with_retry`] is a plain function of its inputs: a [`RetryPolicy`] value,
//! an operation, and a predicate deciding which errors are worth retrying.
//! It holds no counters between calls, so the same policy can drive every
//! model in a fallback chain without leaking attempt state from one model to
//! the next.
//!
//! ## Schedule
//!
//! After failed attempt `n` the wait is `base_delay * 2^(n-1)`. With the
//! default 1500 ms base and three attempts the waits are 1.5 s then 3 s; a
//! fourth attempt (if configured) would wait 6 s. No wait follows the final
//! attempt.
//!
//! Every wait races the cancellation token, so an abort never has to sit out
//! a backoff.

use crate::error::Cancelled;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times to try an operation, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always ≥ 1.
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait after failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Sleep for `delay`, returning early with [`Cancelled`] if `cancel` fires.
pub async fn sleep_or_cancel(
    delay: Duration,
    cancel: Option<&CancellationToken>,
) -> Result<(), Cancelled> {
    match cancel {
        Some(token) => {
            tokio::select! {
                _ = token.cancelled() => Err(Cancelled),
                _ = tokio::time::sleep(delay) => Ok(()),
            }
        }
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
///
/// * `op` receives the 1-indexed attempt number.
/// * `is_transient` decides whether an error is retried.
/// * `on_retry(attempt, delay, &error)` fires before each wait.
///
/// Returns the last error when attempts run out. Returns `E::from(Cancelled)`
/// when `cancel` fires before an attempt or during a wait.
pub async fn with_retry<T, E, F, Fut, P, R>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    is_transient: P,
    mut on_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    R: FnMut(u32, Duration, &E),
    E: From<Cancelled> + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Cancelled.into());
        }
        if attempt > 1 {
            debug!(attempt, max_attempts, "Retrying operation");
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_transient(&err) || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, backing off"
        );
        on_retry(attempt, delay, &err);
        sleep_or_cancel(delay, cancel).await?;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Busy,
        Broken,
        Cancelled,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl From<Cancelled> for TestError {
        fn from(_: Cancelled) -> Self {
            TestError::Cancelled
        }
    }

    fn is_busy(e: &TestError) -> bool {
        *e == TestError::Busy
    }

    #[test]
    fn delay_schedule_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(1500));
        assert_eq!(p.delay_for(2), Duration::from_millis(3000));
        assert_eq!(p.delay_for(3), Duration::from_millis(6000));
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        let p = RetryPolicy::new(100, Duration::from_secs(1));
        assert!(p.delay_for(64) >= p.delay_for(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success_waits_the_schedule() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let mut delays = Vec::new();

        let result: Result<&str, TestError> = with_retry(
            &RetryPolicy::default(),
            None,
            is_busy,
            |_, d, _| delays.push(d),
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(TestError::Busy)
                    } else {
                        Ok("done")
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(delays, vec![Duration::from_millis(1500), Duration::from_millis(3000)]);
        assert_eq!(start.elapsed(), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_return_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry(
            &RetryPolicy::default(),
            None,
            is_busy,
            |_, _, _| {},
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Busy) }
            },
        )
        .await;

        assert_eq!(result, Err(TestError::Busy));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result: Result<(), TestError> = with_retry(
            &RetryPolicy::default(),
            None,
            is_busy,
            |_, _, _| {},
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Broken) }
            },
        )
        .await;

        assert_eq!(result, Err(TestError::Broken));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = with_retry(
            &RetryPolicy::default(),
            Some(&token),
            is_busy,
            |_, _, _| trigger.cancel(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Busy) }
            },
        )
        .await;

        assert_eq!(result, Err(TestError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
