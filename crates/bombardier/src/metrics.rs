//! Harness metrics
//!
//! Emitted through the `metrics` facade; wiring an exporter
//! (`metrics-exporter-prometheus`) is the entrypoint's job.

use std::time::Duration;

use crate::stage::TestOutcome;

/// Record the single duration sample a finished test produces
pub fn record_test_duration(service: &str, outcome: TestOutcome, duration: Duration) {
    metrics::histogram!(
        "bombardier_test_duration_seconds",
        "service" => service.to_string(),
        "outcome" => outcome.as_str(),
    )
    .record(duration.as_secs_f64());
}

/// Record one decorated stage execution
pub fn record_stage_duration(service: &str, stage: &'static str, outcome: &'static str, duration: Duration) {
    metrics::histogram!(
        "bombardier_stage_duration_seconds",
        "service" => service.to_string(),
        "stage" => stage,
        "outcome" => outcome,
    )
    .record(duration.as_secs_f64());
}

/// Record a retry requested by a stage
pub fn record_stage_retry(service: &str, stage: &'static str) {
    metrics::counter!(
        "bombardier_stage_retries_total",
        "service" => service.to_string(),
        "stage" => stage,
    )
    .increment(1);
}

/// Record a launch-permit acquisition on the flow's rate limiter
pub fn record_rate_limit_wait(service: &str) {
    metrics::counter!(
        "bombardier_rate_limit_waits_total",
        "service" => service.to_string(),
    )
    .increment(1);
}

/// Update the active worker gauge for a flow
pub fn set_active_workers(service: &str, count: usize) {
    metrics::gauge!(
        "bombardier_active_workers",
        "service" => service.to_string(),
    )
    .set(count as f64);
}

/// Update the in-flight test gauge for a flow
pub fn set_tests_in_flight(service: &str, count: u64) {
    metrics::gauge!(
        "bombardier_tests_in_flight",
        "service" => service.to_string(),
    )
    .set(count as f64);
}
