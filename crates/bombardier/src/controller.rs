//! Test controller
//!
//! Owns the running testing flows, one per target service. Starting a
//! flow resolves the service, builds its user pool and launches the
//! pipeline workers; stopping one cancels cooperatively and waits for
//! the workers to unwind before the map entry disappears.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use shared::models::TestParams;
use shared::{Error, HarnessConfig};

use crate::api::{ExternalApiFactory, ServiceRegistry};
use crate::context::TestContext;
use crate::metrics;
use crate::order_cache::OrderCache;
use crate::pipeline::StagePipeline;
use crate::rate_limiter::{RateLimiter, SlowStartLimiter};
use crate::stage::StageEnv;
use crate::state_machine::OrderStateMachine;
use crate::user_pool::UserPool;

/// Shared state of one service's testing flow
pub struct TestingFlow {
    params: Arc<TestParams>,
    cancel: CancellationToken,
    tests_started: AtomicU64,
    tests_finished: AtomicU64,
}

impl TestingFlow {
    fn new(params: Arc<TestParams>) -> Self {
        Self {
            params,
            cancel: CancellationToken::new(),
            tests_started: AtomicU64::new(0),
            tests_finished: AtomicU64::new(0),
        }
    }

    /// Claim the next test number, or `None` once the budget is spent
    ///
    /// Compare-exchange keeps `tests_started` from overshooting the
    /// configured test count under concurrent workers.
    fn claim_test_slot(&self) -> Option<u64> {
        let total = self.params.number_of_tests;
        let mut current = self.tests_started.load(Ordering::SeqCst);
        loop {
            if current >= total {
                return None;
            }
            match self.tests_started.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn tests_started(&self) -> u64 {
        self.tests_started.load(Ordering::SeqCst)
    }

    pub fn tests_finished(&self) -> u64 {
        self.tests_finished.load(Ordering::SeqCst)
    }
}

/// Counter snapshot handed to the admin surface
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub service_name: String,
    pub tests_started: u64,
    pub tests_finished: u64,
    pub number_of_tests: u64,
}

struct FlowHandle {
    flow: Arc<TestingFlow>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
}

/// Orchestrates testing flows across target services
pub struct TestController {
    config: HarnessConfig,
    registry: Arc<dyn ServiceRegistry>,
    factory: Arc<dyn ExternalApiFactory>,
    machine: Arc<OrderStateMachine>,
    users: Arc<UserPool>,
    orders: Arc<OrderCache>,
    running: DashMap<String, Arc<FlowHandle>>,
}

impl TestController {
    pub fn new(
        config: HarnessConfig,
        registry: Arc<dyn ServiceRegistry>,
        factory: Arc<dyn ExternalApiFactory>,
    ) -> Self {
        Self {
            config,
            registry,
            factory,
            machine: Arc::new(OrderStateMachine::standard()),
            users: Arc::new(UserPool::new()),
            orders: Arc::new(OrderCache::new()),
            running: DashMap::new(),
        }
    }

    /// Start a testing flow for the service named in `params`
    ///
    /// At most one flow per service: a second start fails with
    /// `AlreadyRunning` while the first one's entry exists.
    pub async fn start_testing_for_service(&self, params: TestParams) -> shared::Result<()> {
        params
            .validate()
            .map_err(|e| Error::bad_request(e.to_string()))?;

        let service = params.service_name.clone();
        let descriptor = self
            .registry
            .resolve(&service)
            .ok_or_else(|| Error::not_found("service", &service))?;

        let params = Arc::new(params);
        let handle = Arc::new(FlowHandle {
            flow: Arc::new(TestingFlow::new(params.clone())),
            workers: tokio::sync::Mutex::new(JoinSet::new()),
        });

        // Atomic insert enforces one flow per service
        match self.running.entry(service.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::already_running(&service));
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(handle.clone());
            }
        }

        let api = match self.factory.connect(&descriptor) {
            Ok(api) => api,
            Err(e) => {
                self.running.remove(&service);
                return Err(e);
            }
        };

        let created = self
            .users
            .create_users_pool(
                &service,
                params.number_of_users,
                self.config.flow.user_account_amount,
                api.as_ref(),
            )
            .await;
        if created == 0 {
            self.running.remove(&service);
            return Err(Error::internal(format!(
                "could not create any users on service {}",
                service
            )));
        }

        let limiter: Arc<dyn RateLimiter> = Arc::new(SlowStartLimiter::with_ramp_interval(
            params.rate_per_second,
            params.slow_start_on,
            Duration::from_millis(self.config.flow.ramp_interval_ms),
        ));
        let env = StageEnv {
            service_name: service.clone(),
            api,
            users: self.users.clone(),
            orders: self.orders.clone(),
            machine: self.machine.clone(),
            cancel: handle.flow.cancel.clone(),
            poll_interval: Duration::from_millis(params.poll_interval_ms),
        };

        let worker_count = self.config.executor.workers_per_flow;
        let mut workers = handle.workers.lock().await;
        for worker in 0..worker_count {
            let env = env.clone();
            let flow = handle.flow.clone();
            let limiter = limiter.clone();
            workers.spawn(pipeline_worker(worker, env, flow, limiter));
        }
        drop(workers);
        metrics::set_active_workers(&service, worker_count);

        tracing::info!(
            service = %service,
            users = created,
            tests = params.number_of_tests,
            rate = params.rate_per_second,
            workers = worker_count,
            "Testing flow started"
        );
        Ok(())
    }

    /// Counter snapshot for one service's flow
    pub fn testing_flow_for_service(&self, service_name: &str) -> shared::Result<FlowSnapshot> {
        let handle = self
            .running
            .get(service_name)
            .ok_or_else(|| Error::not_found("testing flow", service_name))?;
        Ok(FlowSnapshot {
            service_name: service_name.to_string(),
            tests_started: handle.flow.tests_started(),
            tests_finished: handle.flow.tests_finished(),
            number_of_tests: handle.flow.params.number_of_tests,
        })
    }

    /// Cancel a flow and wait for its workers to unwind
    pub async fn stop_test_by_service_name(&self, service_name: &str) -> shared::Result<()> {
        let handle = self
            .running
            .get(service_name)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found("testing flow", service_name))?;

        handle.flow.cancel.cancel();
        let mut workers = handle.workers.lock().await;
        while workers.join_next().await.is_some() {}
        drop(workers);

        self.running.remove(service_name);
        metrics::set_active_workers(service_name, 0);
        tracing::info!(
            service = service_name,
            started = handle.flow.tests_started(),
            finished = handle.flow.tests_finished(),
            "Testing flow stopped"
        );
        Ok(())
    }

    /// Stop every running flow
    pub async fn stop_all_tests(&self) {
        let services: Vec<String> = self
            .running
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for service in services {
            // A flow stopped concurrently is already gone; nothing to do
            let _ = self.stop_test_by_service_name(&service).await;
        }
    }

    /// True while a flow entry exists for the service
    pub fn is_running(&self, service_name: &str) -> bool {
        self.running.contains_key(service_name)
    }

    /// The controller's user pool, for ledger inspection
    pub fn user_pool(&self) -> &Arc<UserPool> {
        &self.users
    }
}

/// One pipeline worker: claim a test, pace the launch, run the stages,
/// account for the result; repeat until the budget is spent or the flow
/// is cancelled.
async fn pipeline_worker(
    worker: usize,
    env: StageEnv,
    flow: Arc<TestingFlow>,
    limiter: Arc<dyn RateLimiter>,
) {
    loop {
        if flow.cancel.is_cancelled() {
            break;
        }
        if !limiter.tick(&flow.cancel).await {
            break;
        }
        metrics::record_rate_limit_wait(&env.service_name);

        let Some(test_number) = flow.claim_test_slot() else {
            break;
        };
        metrics::set_tests_in_flight(
            &env.service_name,
            flow.tests_started() - flow.tests_finished(),
        );

        let mut cx = TestContext::new(flow.params.clone());
        let started = Instant::now();
        let outcome = StagePipeline::assemble(&flow.params)
            .execute(&mut cx, &env)
            .await;
        let elapsed = started.elapsed();

        metrics::record_test_duration(&env.service_name, outcome, elapsed);
        flow.tests_finished.fetch_add(1, Ordering::SeqCst);
        metrics::set_tests_in_flight(
            &env.service_name,
            flow.tests_started() - flow.tests_finished(),
        );

        tracing::debug!(
            service = %env.service_name,
            worker = worker,
            test_id = %cx.test_id,
            test_number = test_number,
            outcome = %outcome,
            duration_ms = elapsed.as_millis() as u64,
            "Test finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedBehavior, SimulatedServices, SimulatedTarget};

    fn controller_with(service: &str, behavior: SimulatedBehavior) -> TestController {
        let services = Arc::new(SimulatedServices::new());
        services.register(service, Arc::new(SimulatedTarget::new(behavior)));
        let mut config = HarnessConfig::default();
        config.executor.workers_per_flow = 4;
        TestController::new(config, services.clone(), services)
    }

    fn quick_params(service: &str, tests: u64) -> TestParams {
        let mut params = TestParams::new(service);
        params.number_of_users = 3;
        params.number_of_tests = tests;
        params.rate_per_second = 1_000;
        params.slow_start_on = false;
        params.abandon_probability = 0.0;
        params.change_items_probability = 0.0;
        params.poll_interval_ms = 10;
        params
    }

    #[tokio::test]
    async fn test_unknown_service_is_rejected() {
        let controller = controller_with("svc", SimulatedBehavior::default());
        let result = controller
            .start_testing_for_service(quick_params("ghost", 1))
            .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert!(!controller.is_running("ghost"));
    }

    #[tokio::test]
    async fn test_invalid_params_are_rejected() {
        let controller = controller_with("svc", SimulatedBehavior::default());
        let mut params = quick_params("svc", 1);
        params.rate_per_second = 0;
        let result = controller.start_testing_for_service(params).await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_second_start_fails_while_running() {
        let controller = controller_with("svc", SimulatedBehavior::default());
        controller
            .start_testing_for_service(quick_params("svc", 50))
            .await
            .unwrap();

        let result = controller
            .start_testing_for_service(quick_params("svc", 50))
            .await;
        assert!(matches!(result, Err(Error::AlreadyRunning { .. })));

        controller.stop_test_by_service_name("svc").await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_counters_are_monotonic() {
        let controller = controller_with("svc", SimulatedBehavior::default());
        controller
            .start_testing_for_service(quick_params("svc", 5))
            .await
            .unwrap();

        let mut last = controller.testing_flow_for_service("svc").unwrap();
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let snapshot = controller.testing_flow_for_service("svc").unwrap();
            assert!(snapshot.tests_started >= last.tests_started);
            assert!(snapshot.tests_finished >= last.tests_finished);
            assert!(snapshot.tests_started >= snapshot.tests_finished);
            assert!(snapshot.tests_started <= snapshot.number_of_tests);
            if snapshot.tests_finished == snapshot.number_of_tests {
                break;
            }
            last = snapshot;
        }

        controller.stop_test_by_service_name("svc").await.unwrap();
        assert!(!controller.is_running("svc"));
    }
}
