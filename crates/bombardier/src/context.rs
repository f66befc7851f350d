//! Per-test context
//!
//! Owned exclusively by the single worker running the test, so no
//! internal synchronization. The user and order ids are assigned exactly
//! once; rewriting either is a harness bug and reported as such.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use shared::models::{PaymentStatus, TestParams};

use crate::error::{StageError, StageResult};

/// Running log of payment attempts for this test
#[derive(Debug, Clone, Default)]
pub struct PaymentDetails {
    pub attempts: u32,
    pub last_status: Option<PaymentStatus>,
    pub amount: i64,
}

/// State threaded through one stage pipeline
#[derive(Debug)]
pub struct TestContext {
    pub test_id: Uuid,
    pub service_name: String,
    params: Arc<TestParams>,
    user_id: Option<Uuid>,
    order_id: Option<Uuid>,
    pub payment_details: PaymentDetails,
    /// Names of completed stages, in execution order
    pub stages_complete: Vec<&'static str>,
    pub was_changed_after_finalization: bool,
    finalized: bool,
    pub test_start: Instant,
}

impl TestContext {
    pub fn new(params: Arc<TestParams>) -> Self {
        Self {
            test_id: Uuid::new_v4(),
            service_name: params.service_name.clone(),
            params,
            user_id: None,
            order_id: None,
            payment_details: PaymentDetails::default(),
            stages_complete: Vec::new(),
            was_changed_after_finalization: false,
            finalized: false,
            test_start: Instant::now(),
        }
    }

    pub fn params(&self) -> &TestParams {
        &self.params
    }

    /// Assign the test's user id; errors if already assigned
    pub fn assign_user(&mut self, user_id: Uuid) -> StageResult<()> {
        if self.user_id.is_some() {
            return Err(StageError::context("user id assigned twice"));
        }
        self.user_id = Some(user_id);
        Ok(())
    }

    /// Assign the test's order id; errors if already assigned
    pub fn assign_order(&mut self, order_id: Uuid) -> StageResult<()> {
        if self.order_id.is_some() {
            return Err(StageError::context("order id assigned twice"));
        }
        self.order_id = Some(order_id);
        Ok(())
    }

    pub fn user_id(&self) -> StageResult<Uuid> {
        self.user_id
            .ok_or_else(|| StageError::context("no user selected yet"))
    }

    pub fn order_id(&self) -> StageResult<Uuid> {
        self.order_id
            .ok_or_else(|| StageError::context("no order created yet"))
    }

    pub fn mark_stage_complete(&mut self, name: &'static str) {
        self.stages_complete.push(name);
    }

    /// Called by the finalization stage once booking concluded
    pub fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    /// Called when items changed after finalization; forces a re-run of
    /// finalization and slot selection
    pub fn record_change_after_finalization(&mut self) {
        self.was_changed_after_finalization = true;
        self.finalized = false;
    }

    /// True while a change after finalization has not been re-finalized
    pub fn finalization_needed(&self) -> bool {
        self.was_changed_after_finalization && !self.finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> TestContext {
        TestContext::new(Arc::new(TestParams::new("svc")))
    }

    #[test]
    fn test_ids_assigned_exactly_once() {
        let mut cx = context();
        let user = Uuid::new_v4();

        assert!(cx.user_id().is_err());
        cx.assign_user(user).unwrap();
        assert_eq!(cx.user_id().unwrap(), user);
        assert!(matches!(
            cx.assign_user(Uuid::new_v4()),
            Err(StageError::Context(_))
        ));

        cx.assign_order(Uuid::new_v4()).unwrap();
        assert!(cx.assign_order(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_finalization_needed_cycle() {
        let mut cx = context();
        assert!(!cx.finalization_needed());

        cx.mark_finalized();
        assert!(!cx.finalization_needed());

        cx.record_change_after_finalization();
        assert!(cx.finalization_needed());

        cx.mark_finalized();
        assert!(!cx.finalization_needed());
    }

    #[test]
    fn test_stage_log_keeps_order() {
        let mut cx = context();
        cx.mark_stage_complete("OrderCreation");
        cx.mark_stage_complete("OrderFinalizing");
        assert_eq!(cx.stages_complete, vec!["OrderCreation", "OrderFinalizing"]);
    }
}
