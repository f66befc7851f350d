//! Concrete pipeline stages
//!
//! Each stage reads the current test context and talks to the target
//! through the external API. Every order read funnels through
//! [`fetch_and_observe`], which audits the observed status change
//! against the state machine and refreshes the order cache.

pub mod change_after_finalization;
pub mod choose_user;
pub mod delivery_slots;
pub mod order_abandoned;
pub mod order_collecting;
pub mod order_creation;
pub mod order_delivery;
pub mod order_finalizing;
pub mod order_payment;

pub use change_after_finalization::OrderChangeItemsAfterFinalization;
pub use choose_user::ChooseUserAccount;
pub use delivery_slots::OrderSettingDeliverySlots;
pub use order_abandoned::OrderAbandoned;
pub use order_collecting::OrderCollecting;
pub use order_creation::OrderCreation;
pub use order_delivery::OrderDelivery;
pub use order_finalizing::OrderFinalizing;
pub use order_payment::OrderPayment;

use shared::models::Order;

use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::StageEnv;

/// Audit an order snapshot against the last one we saw, then cache it
///
/// Re-reads showing the same status variant are refreshes, not
/// transition events, and always pass; a changed variant must be a legal
/// transition or the stage fails with the illegal-transition error.
pub(crate) fn observe_order(cx: &TestContext, env: &StageEnv, order: &Order) -> StageResult<()> {
    if let Some(previous) = env.orders.get(&cx.service_name, order.id) {
        if previous.status.kind() != order.status.kind() {
            let allowed = env
                .machine
                .is_transition_allowed(&previous.status, &order.status)
                .map_err(|unknown| StageError::UnknownState(unknown.0))?;
            if !allowed {
                return Err(StageError::IllegalTransition {
                    from: previous.status.kind(),
                    to: order.status.kind(),
                });
            }
        }
    }
    env.orders.insert(&cx.service_name, order.clone());
    Ok(())
}

/// Read the test's order from the target, audit and cache it
pub(crate) async fn fetch_and_observe(cx: &TestContext, env: &StageEnv) -> StageResult<Order> {
    let order = env.api.get_order(cx.user_id()?, cx.order_id()?).await?;
    observe_order(cx, env, &order)?;
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_cache::OrderCache;
    use crate::sim::{SimulatedBehavior, SimulatedTarget};
    use crate::state_machine::OrderStateMachine;
    use crate::user_pool::UserPool;
    use chrono::Utc;
    use shared::models::{OrderStatus, TestParams};
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn test_env() -> StageEnv {
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

    fn order(id: Uuid, status: OrderStatus) -> Order {
        Order {
            id,
            time_created: Utc::now(),
            status,
            items: HashMap::new(),
            delivery_duration: None,
            payment_history: vec![],
        }
    }

    #[test]
    fn test_observe_accepts_legal_transition() {
        let env = test_env();
        let cx = TestContext::new(Arc::new(TestParams::new("svc")));
        let id = Uuid::new_v4();

        observe_order(&cx, &env, &order(id, OrderStatus::Collecting)).unwrap();
        observe_order(&cx, &env, &order(id, OrderStatus::Booked)).unwrap();
        assert_eq!(
            env.orders.get("svc", id).unwrap().status,
            OrderStatus::Booked
        );
    }

    #[test]
    fn test_observe_drops_noop_reads() {
        let env = test_env();
        let cx = TestContext::new(Arc::new(TestParams::new("svc")));
        let id = Uuid::new_v4();

        observe_order(&cx, &env, &order(id, OrderStatus::Collecting)).unwrap();
        // Polling the same status repeatedly is a refresh, not a transition
        observe_order(&cx, &env, &order(id, OrderStatus::Collecting)).unwrap();
        observe_order(&cx, &env, &order(id, OrderStatus::Collecting)).unwrap();
    }

    #[test]
    fn test_observe_rejects_illegal_transition() {
        let env = test_env();
        let cx = TestContext::new(Arc::new(TestParams::new("svc")));
        let id = Uuid::new_v4();

        observe_order(&cx, &env, &order(id, OrderStatus::Booked)).unwrap();
        let delivered = order(
            id,
            OrderStatus::Delivered {
                delivery_start_time: Utc::now(),
                delivery_finish_time: Utc::now(),
            },
        );
        let result = observe_order(&cx, &env, &delivered);
        assert!(matches!(
            result,
            Err(StageError::IllegalTransition { .. })
        ));
        // The illegal snapshot is not cached
        assert_eq!(
            env.orders.get("svc", id).unwrap().status,
            OrderStatus::Booked
        );
    }
}
