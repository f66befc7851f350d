//! Per-test stage pipeline
//!
//! A fresh decorated stage sequence is assembled for every test: the
//! probabilistic stages (abandoned cart, post-finalization change) are
//! drawn in or out at assembly time, delivery is skipped when the flow
//! counts a successful payment as success. The runner consults the
//! context after every stage and re-queues finalization plus slot
//! selection while a change is pending.

use std::collections::VecDeque;
use std::sync::Arc;

use rand::Rng;

use shared::models::TestParams;

use crate::context::TestContext;
use crate::stage::{self, Continuation, StageEnv, TestOutcome, TestStage};
use crate::stages::{
    ChooseUserAccount, OrderAbandoned, OrderChangeItemsAfterFinalization, OrderCollecting,
    OrderCreation, OrderDelivery, OrderFinalizing, OrderPayment, OrderSettingDeliverySlots,
};

pub struct StagePipeline {
    queue: VecDeque<Arc<dyn TestStage>>,
    finalize: Arc<dyn TestStage>,
    slots: Arc<dyn TestStage>,
}

impl StagePipeline {
    /// Assemble the decorated stage sequence for one test
    pub fn assemble(params: &TestParams) -> Self {
        let finalize = stage::decorate(Box::new(OrderFinalizing));
        let slots = stage::decorate(Box::new(OrderSettingDeliverySlots));

        let (with_abandon, with_change) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_bool(params.abandon_probability),
                rng.gen_bool(params.change_items_probability),
            )
        };

        let mut queue: VecDeque<Arc<dyn TestStage>> = VecDeque::new();
        queue.push_back(stage::decorate(Box::new(ChooseUserAccount)));
        queue.push_back(stage::decorate(Box::new(OrderCreation)));
        queue.push_back(stage::decorate(Box::new(OrderCollecting)));
        if with_abandon {
            queue.push_back(stage::decorate(Box::new(OrderAbandoned)));
        }
        queue.push_back(finalize.clone());
        queue.push_back(slots.clone());
        if with_change {
            queue.push_back(stage::decorate(Box::new(OrderChangeItemsAfterFinalization)));
        }
        queue.push_back(stage::decorate(Box::new(OrderPayment)));
        if !params.test_success_by_the_payment_fact {
            queue.push_back(stage::decorate(Box::new(OrderDelivery)));
        }

        Self {
            queue,
            finalize,
            slots,
        }
    }

    /// Number of stages currently queued
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drive the pipeline to its terminal outcome
    ///
    /// Exactly one outcome is produced per test; the caller records the
    /// single duration sample from it.
    pub async fn execute(mut self, cx: &mut TestContext, env: &StageEnv) -> TestOutcome {
        while let Some(current) = self.queue.pop_front() {
            if env.cancel.is_cancelled() {
                return TestOutcome::Stop;
            }

            match current.run(cx, env).await {
                Ok(Continuation::Continue) => {
                    if cx.finalization_needed() {
                        self.queue.push_front(self.slots.clone());
                        self.queue.push_front(self.finalize.clone());
                    }
                }
                Ok(Continuation::Fail) => return TestOutcome::Fail,
                Ok(Continuation::Error) => return TestOutcome::Error,
                Ok(Continuation::Retry) => return TestOutcome::Retry,
                Ok(Continuation::Stop) => return TestOutcome::Stop,
                Err(e) => {
                    // Should have been absorbed by the exception-free
                    // decorator; classify as unexpected and end the test
                    tracing::error!(
                        test_id = %cx.test_id,
                        service = %env.service_name,
                        stage = stage::innermost_name(current.as_ref()),
                        error = %e,
                        "Stage error escaped its decorators"
                    );
                    return TestOutcome::UnexpectedFail;
                }
            }
        }
        TestOutcome::Success
    }
}
