//! Post-finalization item change stage

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;

use shared::models::OrderStatusKind;

use crate::api::ITEM_VISIBILITY_TIMEOUT;
use crate::awaiter::{AwaitOutcome, ConditionAwaiter};
use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::{Continuation, StageEnv, TestStage};
use crate::stages::fetch_and_observe;

/// Largest per-item amount the change puts into the order
const MAX_ITEM_AMOUNT: i64 = 10;

/// Re-enters collection on a booked order by putting one more item into
/// it, sending the order back to `Collecting`. The pipeline re-runs
/// finalization and slot selection afterwards.
pub struct OrderChangeItemsAfterFinalization;

pub const NAME: &str = "OrderChangeItemsAfterFinalization";

#[async_trait]
impl TestStage for OrderChangeItemsAfterFinalization {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let user_id = cx.user_id()?;
        let order_id = cx.order_id()?;

        let catalog = env.api.available_items(user_id).await?;
        let (item_id, amount) = {
            let mut rng = rand::thread_rng();
            let item = catalog
                .choose(&mut rng)
                .ok_or_else(|| StageError::failed("target offers no purchasable items"))?;
            (item.id, rng.gen_range(1..=MAX_ITEM_AMOUNT))
        };

        let accepted = env
            .api
            .put_item_to_order(user_id, order_id, item_id, amount)
            .await?;
        if !accepted {
            return Err(StageError::failed(format!(
                "target rejected post-finalization change of item {}",
                item_id
            )));
        }

        let cx_ref: &TestContext = cx;
        let outcome = ConditionAwaiter::await_at_most(ITEM_VISIBILITY_TIMEOUT, env.cancel.clone())
            .poll_interval(env.poll_interval)
            .start_waiting(
                move || async move {
                    let order = fetch_and_observe(cx_ref, env).await?;
                    Ok(order.status.kind() == OrderStatusKind::Collecting
                        && order.items.get(&item_id).map(|line| line.amount) == Some(amount))
                },
                move || {
                    Err(StageError::failed(format!(
                        "changed item {} never became visible after finalization",
                        item_id
                    )))
                },
            )
            .await?;
        if outcome == AwaitOutcome::Cancelled {
            return Ok(Continuation::Stop);
        }

        cx.record_change_after_finalization();
        cx.mark_stage_complete(NAME);
        tracing::debug!(
            test_id = %cx.test_id,
            order_id = %order_id,
            item_id = %item_id,
            "Order changed after finalization"
        );
        Ok(Continuation::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedBehavior, SimulatedTarget};
    use crate::stages::{ChooseUserAccount, OrderCollecting, OrderCreation, OrderFinalizing};
    use crate::{order_cache::OrderCache, state_machine::OrderStateMachine, user_pool::UserPool};
    use shared::models::TestParams;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_change_reenters_collection_and_requests_refinalization() {
        let api: Arc<SimulatedTarget> =
            Arc::new(SimulatedTarget::new(SimulatedBehavior::default()));
        let users = Arc::new(UserPool::new());
        users.create_users_pool("svc", 1, 1_000_000, api.as_ref()).await;
        let env = StageEnv {
            service_name: "svc".to_string(),
            api,
            users,
            orders: Arc::new(OrderCache::new()),
            machine: Arc::new(OrderStateMachine::standard()),
            cancel: CancellationToken::new(),
            poll_interval: Duration::from_millis(10),
        };
        let mut cx = TestContext::new(Arc::new(TestParams::new("svc")));
        ChooseUserAccount.run(&mut cx, &env).await.unwrap();
        OrderCreation.run(&mut cx, &env).await.unwrap();
        OrderCollecting.run(&mut cx, &env).await.unwrap();
        OrderFinalizing.run(&mut cx, &env).await.unwrap();
        assert!(!cx.finalization_needed());

        let outcome = OrderChangeItemsAfterFinalization
            .run(&mut cx, &env)
            .await
            .unwrap();
        assert_eq!(outcome, Continuation::Continue);
        assert!(cx.was_changed_after_finalization);
        assert!(cx.finalization_needed());

        let cached = env.orders.get("svc", cx.order_id().unwrap()).unwrap();
        assert_eq!(cached.status.kind(), OrderStatusKind::Collecting);
    }
}
