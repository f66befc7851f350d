//! Condition awaiter
//!
//! Synchronizes the harness with the target service by polling a
//! predicate until it holds or a deadline passes. The predicate calls
//! into the external API, so it may suspend and must be safe to
//! re-evaluate. Cancellation of the surrounding test wins over both the
//! predicate and the on-failure handler.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::StageResult;

/// Default interval between predicate evaluations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a wait concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwaitOutcome {
    /// The predicate became true before the deadline
    Satisfied,
    /// The deadline passed; the on-failure handler ran exactly once
    TimedOut,
    /// The surrounding test was cancelled; the handler did not run
    Cancelled,
}

/// Deadline-bounded predicate poller
///
/// ```ignore
/// let outcome = ConditionAwaiter::await_at_most(timeout, cancel.clone())
///     .poll_interval(env.poll_interval)
///     .start_waiting(
///         || async { Ok(api.get_order(user, order).await?.status == expected) },
///         || Err(StageError::failed("order never reached expected status")),
///     )
///     .await?;
/// ```
#[derive(Debug)]
pub struct ConditionAwaiter {
    timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ConditionAwaiter {
    /// Start building a wait bounded by `timeout`
    pub fn await_at_most(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel,
        }
    }

    /// Override the polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Poll `condition` until it holds, the deadline passes, or the test
    /// is cancelled
    ///
    /// `on_failure` runs exactly once on deadline expiry and may turn the
    /// timeout into a stage error; it is never invoked on cancellation.
    /// Predicate errors propagate immediately.
    pub async fn start_waiting<C, Fut, H>(
        self,
        mut condition: C,
        on_failure: H,
    ) -> StageResult<AwaitOutcome>
    where
        C: FnMut() -> Fut + Send,
        Fut: Future<Output = StageResult<bool>> + Send,
        H: FnOnce() -> StageResult<()> + Send,
    {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(AwaitOutcome::Cancelled);
            }

            if condition().await? {
                return Ok(AwaitOutcome::Satisfied);
            }

            if tokio::time::Instant::now() >= deadline {
                on_failure()?;
                return Ok(AwaitOutcome::TimedOut);
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(AwaitOutcome::Cancelled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_returns_once_condition_holds() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();

        let outcome = ConditionAwaiter::await_at_most(
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .poll_interval(Duration::from_millis(10))
        .start_waiting(
            || {
                let counter = counter.clone();
                async move { Ok(counter.fetch_add(1, Ordering::SeqCst) >= 3) }
            },
            || panic!("handler must not run"),
        )
        .await
        .unwrap();

        assert_eq!(outcome, AwaitOutcome::Satisfied);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_fires_exactly_once_on_timeout() {
        let fired = Arc::new(AtomicU32::new(0));
        let handler_fired = fired.clone();

        let started = tokio::time::Instant::now();
        let outcome = ConditionAwaiter::await_at_most(
            Duration::from_millis(100),
            CancellationToken::new(),
        )
        .poll_interval(Duration::from_millis(30))
        .start_waiting(
            || async { Ok(false) },
            move || {
                handler_fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome, AwaitOutcome::TimedOut);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Fires within [deadline, deadline + poll_interval]
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed <= Duration::from_millis(130));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_propagates() {
        let result = ConditionAwaiter::await_at_most(
            Duration::from_millis(50),
            CancellationToken::new(),
        )
        .poll_interval(Duration::from_millis(10))
        .start_waiting(
            || async { Ok(false) },
            || Err(StageError::failed("order never became visible")),
        )
        .await;

        assert!(matches!(result, Err(StageError::Failed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_error_propagates() {
        let result = ConditionAwaiter::await_at_most(
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .start_waiting(
            || async { Err(StageError::context("boom")) },
            || panic!("handler must not run"),
        )
        .await;

        assert!(matches!(result, Err(StageError::Context(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_returns_promptly_without_handler() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let outcome = ConditionAwaiter::await_at_most(Duration::from_secs(30), cancel)
            .poll_interval(Duration::from_millis(100))
            .start_waiting(|| async { Ok(false) }, || panic!("handler must not run"))
            .await
            .unwrap();

        assert_eq!(outcome, AwaitOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = ConditionAwaiter::await_at_most(Duration::from_secs(30), cancel)
            .start_waiting(
                || async { panic!("predicate must not run") },
                || panic!("handler must not run"),
            )
            .await
            .unwrap();

        assert_eq!(outcome, AwaitOutcome::Cancelled);
    }
}
