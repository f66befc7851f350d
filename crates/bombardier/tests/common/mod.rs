//! Common test utilities for the scenario suite
//!
//! Provides a counting metrics recorder (so tests can assert on emitted
//! duration samples) and helpers for building controllers over simulated
//! targets and waiting for flow completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use metrics::{Counter, Gauge, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit};

use bombardier::controller::TestController;
use bombardier::sim::{SimulatedBehavior, SimulatedServices, SimulatedTarget};
use shared::models::TestParams;
use shared::HarnessConfig;

/// Shared histogram sample counts, keyed by metric name + sorted labels
pub type SampleStore = Arc<Mutex<HashMap<String, u64>>>;

static STORE: OnceLock<SampleStore> = OnceLock::new();

/// Install the counting recorder (once per process) and return its store
///
/// Tests share the process-wide recorder, so every test must use a
/// unique service name to keep its samples apart.
pub fn install_recorder() -> SampleStore {
    let store = STORE
        .get_or_init(|| Arc::new(Mutex::new(HashMap::new())))
        .clone();
    let _ = metrics::set_global_recorder(CountingRecorder {
        store: store.clone(),
    });
    store
}

fn key_string(key: &Key) -> String {
    let mut labels: Vec<String> = key
        .labels()
        .map(|label| format!("{}={}", label.key(), label.value()))
        .collect();
    labels.sort();
    format!("{}{{{}}}", key.name(), labels.join(","))
}

/// Number of samples recorded for a histogram with exactly these labels
pub fn sample_count(store: &SampleStore, name: &str, labels: &[(&str, &str)]) -> u64 {
    let mut labels: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    labels.sort();
    let key = format!("{}{{{}}}", name, labels.join(","));
    *store.lock().unwrap().get(&key).unwrap_or(&0)
}

struct CountingRecorder {
    store: SampleStore,
}

struct CountingHistogram {
    key: String,
    store: SampleStore,
}

impl HistogramFn for CountingHistogram {
    fn record(&self, _value: f64) {
        *self.store.lock().unwrap().entry(self.key.clone()).or_insert(0) += 1;
    }
}

impl Recorder for CountingRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, _key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::noop()
    }

    fn register_gauge(&self, _key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::noop()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(CountingHistogram {
            key: key_string(key),
            store: self.store.clone(),
        }))
    }
}

/// Controller over a single simulated target, with a small worker pool
pub fn controller_for(service: &str, behavior: SimulatedBehavior) -> TestController {
    let services = Arc::new(SimulatedServices::new());
    services.register(service, Arc::new(SimulatedTarget::new(behavior)));
    let mut config = HarnessConfig::default();
    config.executor.workers_per_flow = 4;
    config.flow.user_account_amount = 100_000;
    TestController::new(config, services.clone(), services)
}

/// Flow params tuned for fast, deterministic scenario runs
pub fn scenario_params(service: &str, number_of_tests: u64) -> TestParams {
    let mut params = TestParams::new(service);
    params.number_of_users = 10;
    params.number_of_tests = number_of_tests;
    params.rate_per_second = 1_000;
    params.slow_start_on = false;
    params.abandon_probability = 0.0;
    params.change_items_probability = 0.0;
    params.poll_interval_ms = 10;
    params
}

/// Wait until every test of the flow finished, or panic after `timeout`
pub async fn await_flow_completion(
    controller: &TestController,
    service: &str,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let snapshot = controller.testing_flow_for_service(service).unwrap();
        if snapshot.tests_finished >= snapshot.number_of_tests {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "flow for {} did not finish in time: {}/{} tests",
                service, snapshot.tests_finished, snapshot.number_of_tests
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
