//! Slow-start rate limiter
//!
//! Paces stage-pipeline launches for one testing flow. The bucket itself
//! is a `governor` direct limiter (capacity = refill = current rate); the
//! slow-start policy swaps in a larger bucket every time the scheduled
//! rate steps up. The schedule is computed from a monotonic clock, never
//! from wall-clock sleeps, so concurrent `tick` callers observe a
//! consistent ramp.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use tokio_util::sync::CancellationToken;

/// Type alias for the direct limiter to reduce complexity
type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default interval between ramp steps
pub const DEFAULT_RAMP_INTERVAL: Duration = Duration::from_secs(1);

/// Rate limiter trait for testability
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Suspend until one launch permit is available
    ///
    /// Returns `false` without consuming a permit when the flow is
    /// cancelled while waiting.
    async fn tick(&self, cancel: &CancellationToken) -> bool;
}

/// Per-flow launch pacer with optional slow-start ramp
///
/// With slow start on, the rate begins at `max(1, target/10)` and gains
/// `ceil(target/10)` every ramp interval until it reaches the target.
pub struct SlowStartLimiter {
    target_rate: u32,
    slow_start: bool,
    ramp_interval: Duration,
    started_at: Instant,
    current: Mutex<(u32, Arc<DirectLimiter>)>,
}

impl SlowStartLimiter {
    /// Create a limiter for `target_rate` permits per second
    pub fn new(target_rate: u32, slow_start: bool) -> Self {
        Self::with_ramp_interval(target_rate, slow_start, DEFAULT_RAMP_INTERVAL)
    }

    /// Create with a custom ramp step interval
    pub fn with_ramp_interval(target_rate: u32, slow_start: bool, ramp_interval: Duration) -> Self {
        let target_rate = target_rate.max(1);
        let initial = if slow_start {
            (target_rate / 10).max(1)
        } else {
            target_rate
        };
        Self {
            target_rate,
            slow_start,
            ramp_interval,
            started_at: Instant::now(),
            current: Mutex::new((initial, Arc::new(Self::bucket(initial)))),
        }
    }

    fn bucket(rate: u32) -> DirectLimiter {
        let quota = Quota::per_second(NonZeroU32::new(rate).expect("Rate must be > 0"));
        GovernorRateLimiter::direct(quota)
    }

    /// Rate the ramp schedule allows after `elapsed` time
    pub fn scheduled_rate(&self, elapsed: Duration) -> u32 {
        if !self.slow_start {
            return self.target_rate;
        }
        let base = (self.target_rate / 10).max(1);
        let step = self.target_rate.div_ceil(10);
        let steps = (elapsed.as_millis() / self.ramp_interval.as_millis().max(1)) as u32;
        base.saturating_add(step.saturating_mul(steps))
            .min(self.target_rate)
    }

    /// Rate currently in effect
    pub fn current_rate(&self) -> u32 {
        self.current.lock().unwrap().0
    }

    /// Bucket matching the schedule, swapping in a fresh one on a ramp step
    fn bucket_for_now(&self) -> Arc<DirectLimiter> {
        let scheduled = self.scheduled_rate(self.started_at.elapsed());
        let mut current = self.current.lock().unwrap();
        if current.0 != scheduled {
            tracing::debug!(
                from = current.0,
                to = scheduled,
                target = self.target_rate,
                "Rate limiter ramp step"
            );
            *current = (scheduled, Arc::new(Self::bucket(scheduled)));
        }
        current.1.clone()
    }
}

#[async_trait]
impl RateLimiter for SlowStartLimiter {
    async fn tick(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let limiter = self.bucket_for_now();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = limiter.until_ready() => true,
        }
    }
}

/// No-op rate limiter for testing
#[cfg(test)]
#[derive(Clone, Default)]
pub struct NoopRateLimiter;

#[cfg(test)]
#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn tick(&self, cancel: &CancellationToken) -> bool {
        !cancel.is_cancelled()
    }
}
