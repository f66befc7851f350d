//! Test stage abstraction and decorators
//!
//! A stage is one phase of a test with a single responsibility. Stages
//! are stateless with respect to any particular test: everything mutable
//! lives in the [`TestContext`]. Decorators compose by wrapping; the
//! innermost concrete stage's name is what metrics and logs carry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::ExternalServiceApi;
use crate::context::TestContext;
use crate::error::StageResult;
use crate::metrics;
use crate::order_cache::OrderCache;
use crate::state_machine::OrderStateMachine;
use crate::user_pool::UserPool;

/// Outcome of one stage execution, driving the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    /// Advance to the next stage
    Continue,
    /// End the test as a business failure
    Fail,
    /// End the test as unexpected
    Error,
    /// Re-execute the same stage
    Retry,
    /// End the test neutrally
    Stop,
}

impl Continuation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Continuation::Continue => "CONTINUE",
            Continuation::Fail => "FAIL",
            Continuation::Error => "ERROR",
            Continuation::Retry => "RETRY",
            Continuation::Stop => "STOP",
        }
    }

    /// Fail states for metric labeling
    pub fn is_fail_state(&self) -> bool {
        matches!(self, Continuation::Fail | Continuation::Error)
    }
}

/// Terminal outcome of a whole test, the metric label set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Success,
    Fail,
    Error,
    Retry,
    Stop,
    /// A stage result escaped the exception-free decorator
    UnexpectedFail,
}

impl TestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Success => "SUCCESS",
            TestOutcome::Fail => "FAIL",
            TestOutcome::Error => "ERROR",
            TestOutcome::Retry => "RETRY",
            TestOutcome::Stop => "STOP",
            TestOutcome::UnexpectedFail => "UNEXPECTED_FAIL",
        }
    }
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared collaborators handed to every stage
#[derive(Clone)]
pub struct StageEnv {
    pub service_name: String,
    pub api: Arc<dyn ExternalServiceApi>,
    pub users: Arc<UserPool>,
    pub orders: Arc<OrderCache>,
    pub machine: Arc<OrderStateMachine>,
    pub cancel: CancellationToken,
    pub poll_interval: Duration,
}

/// One phase of a test
#[async_trait]
pub trait TestStage: Send + Sync {
    /// Class-style stage name used for metrics and logs
    fn name(&self) -> &'static str;

    /// The stage this one wraps, if it is a decorator
    fn wrapped(&self) -> Option<&dyn TestStage> {
        None
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation>;
}

/// Name of the innermost concrete stage in a decorator chain
pub fn innermost_name(stage: &dyn TestStage) -> &'static str {
    let mut current = stage;
    while let Some(inner) = current.wrapped() {
        current = inner;
    }
    current.name()
}

/// Maximum attempts granted to a stage that keeps answering `Retry`
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Re-runs the wrapped stage while it returns `Retry`, up to
/// [`MAX_RETRY_ATTEMPTS`]; any other outcome passes through unchanged.
/// If the final attempt still asks for a retry, `Retry` is emitted and
/// the pipeline ends the test with it.
pub struct RetryableStage {
    inner: Box<dyn TestStage>,
}

impl RetryableStage {
    pub fn new(inner: Box<dyn TestStage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TestStage for RetryableStage {
    fn name(&self) -> &'static str {
        "RetryableStage"
    }

    fn wrapped(&self) -> Option<&dyn TestStage> {
        Some(self.inner.as_ref())
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let stage = innermost_name(self);
        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            match self.inner.run(cx, env).await? {
                Continuation::Retry if attempt < MAX_RETRY_ATTEMPTS => {
                    metrics::record_stage_retry(&env.service_name, stage);
                    tracing::warn!(
                        test_id = %cx.test_id,
                        stage = stage,
                        attempt = attempt,
                        max_attempts = MAX_RETRY_ATTEMPTS,
                        "Stage requested retry"
                    );
                }
                other => return Ok(other),
            }
        }
        Ok(Continuation::Retry)
    }
}

/// Catches every stage error. Business failures map to `Fail`, anything
/// else to `Error`; either way the pipeline sees a clean continuation.
pub struct ExceptionFreeStage {
    inner: Box<dyn TestStage>,
}

impl ExceptionFreeStage {
    pub fn new(inner: Box<dyn TestStage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TestStage for ExceptionFreeStage {
    fn name(&self) -> &'static str {
        "ExceptionFreeStage"
    }

    fn wrapped(&self) -> Option<&dyn TestStage> {
        Some(self.inner.as_ref())
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let stage = innermost_name(self);
        match self.inner.run(cx, env).await {
            Ok(continuation) => Ok(continuation),
            Err(e) if e.is_business_failure() => {
                tracing::warn!(
                    test_id = %cx.test_id,
                    service = %env.service_name,
                    stage = stage,
                    error = %e,
                    "Stage failed"
                );
                Ok(Continuation::Fail)
            }
            Err(e) => {
                tracing::error!(
                    test_id = %cx.test_id,
                    service = %env.service_name,
                    stage = stage,
                    error = %e,
                    "Unexpected stage error"
                );
                Ok(Continuation::Error)
            }
        }
    }
}

/// Times the wrapped run and records a duration sample labeled
/// `{service, stage, outcome}`
pub struct MetricRecordableStage {
    inner: Box<dyn TestStage>,
}

impl MetricRecordableStage {
    pub fn new(inner: Box<dyn TestStage>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TestStage for MetricRecordableStage {
    fn name(&self) -> &'static str {
        "MetricRecordableStage"
    }

    fn wrapped(&self) -> Option<&dyn TestStage> {
        Some(self.inner.as_ref())
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let stage = innermost_name(self);
        let started = Instant::now();
        let result = self.inner.run(cx, env).await;
        let outcome = match &result {
            Ok(continuation) => continuation.as_str(),
            Err(_) => "UNEXPECTED_FAIL",
        };
        metrics::record_stage_duration(&env.service_name, stage, outcome, started.elapsed());
        result
    }
}

/// Standard decorator stack: metrics around error classification around
/// bounded retries
pub fn decorate(stage: Box<dyn TestStage>) -> Arc<dyn TestStage> {
    Arc::new(MetricRecordableStage::new(Box::new(ExceptionFreeStage::new(
        Box::new(RetryableStage::new(stage)),
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::sim::{SimulatedBehavior, SimulatedTarget};
    use shared::models::TestParams;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn env() -> StageEnv {
        StageEnv {
            service_name: "svc".to_string(),
            api: Arc::new(SimulatedTarget::new(SimulatedBehavior::default())),
            users: Arc::new(UserPool::new()),
            orders: Arc::new(OrderCache::new()),
            machine: Arc::new(OrderStateMachine::standard()),
            cancel: CancellationToken::new(),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn context() -> TestContext {
        TestContext::new(Arc::new(TestParams::new("svc")))
    }

    /// Scripted stage answering from a fixed list of outcomes; the last
    /// entry repeats once the script runs out
    struct ScriptedStage {
        outcomes: Vec<StageResult<Continuation>>,
        calls: Arc<AtomicU32>,
    }

    impl ScriptedStage {
        fn new(outcomes: Vec<StageResult<Continuation>>) -> Self {
            Self {
                outcomes,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        fn always(outcome: StageResult<Continuation>) -> Self {
            Self::new(vec![outcome])
        }

        fn call_counter(&self) -> Arc<AtomicU32> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl TestStage for ScriptedStage {
        fn name(&self) -> &'static str {
            "ScriptedStage"
        }

        async fn run(&self, _cx: &mut TestContext, _env: &StageEnv) -> StageResult<Continuation> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let idx = call.min(self.outcomes.len() - 1);
            match &self.outcomes[idx] {
                Ok(c) => Ok(*c),
                Err(StageError::Failed(msg)) => Err(StageError::failed(msg.clone())),
                Err(e) => Err(StageError::context(e.to_string())),
            }
        }
    }

    #[test]
    fn test_innermost_name_traverses_chain() {
        let stage = decorate(Box::new(ScriptedStage::always(Ok(Continuation::Continue))));
        assert_eq!(innermost_name(stage.as_ref()), "ScriptedStage");
        assert_eq!(stage.name(), "MetricRecordableStage");
    }

    #[tokio::test]
    async fn test_retryable_passes_non_retry_through() {
        let inner = ScriptedStage::always(Ok(Continuation::Fail));
        let stage = RetryableStage::new(Box::new(inner));
        let outcome = stage.run(&mut context(), &env()).await.unwrap();
        assert_eq!(outcome, Continuation::Fail);
    }

    #[tokio::test]
    async fn test_retryable_reruns_until_success() {
        let inner = ScriptedStage::new(vec![
            Ok(Continuation::Retry),
            Ok(Continuation::Retry),
            Ok(Continuation::Continue),
        ]);
        let stage = RetryableStage::new(Box::new(inner));
        let outcome = stage.run(&mut context(), &env()).await.unwrap();
        assert_eq!(outcome, Continuation::Continue);
    }

    #[tokio::test]
    async fn test_retryable_exhausts_after_five_attempts() {
        let inner = ScriptedStage::always(Ok(Continuation::Retry));
        let calls = inner.call_counter();
        let stage = RetryableStage::new(Box::new(inner));

        let outcome = stage.run(&mut context(), &env()).await.unwrap();
        assert_eq!(outcome, Continuation::Retry);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_exception_free_maps_business_failure_to_fail() {
        let inner = ScriptedStage::always(Err(StageError::failed("contract broken")));
        let stage = ExceptionFreeStage::new(Box::new(inner));
        let outcome = stage.run(&mut context(), &env()).await.unwrap();
        assert_eq!(outcome, Continuation::Fail);
    }

    #[tokio::test]
    async fn test_exception_free_maps_other_errors_to_error() {
        let inner = ScriptedStage::always(Err(StageError::context("harness bug")));
        let stage = ExceptionFreeStage::new(Box::new(inner));
        let outcome = stage.run(&mut context(), &env()).await.unwrap();
        assert_eq!(outcome, Continuation::Error);
    }

    #[tokio::test]
    async fn test_full_stack_converts_error_after_retries() {
        // Retry twice, then blow up: the stack must settle on Fail
        let inner = ScriptedStage::new(vec![
            Ok(Continuation::Retry),
            Ok(Continuation::Retry),
            Err(StageError::failed("gave up")),
        ]);
        let stage = decorate(Box::new(inner));
        let outcome = stage.run(&mut context(), &env()).await.unwrap();
        assert_eq!(outcome, Continuation::Fail);
    }
}
