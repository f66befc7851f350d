//! Order creation stage

use async_trait::async_trait;

use shared::models::OrderStatusKind;

use crate::context::TestContext;
use crate::error::StageResult;
use crate::stage::{Continuation, StageEnv, TestStage};

/// Creates a fresh order and pins its id to the context. The target must
/// hand the order back in `Collecting`.
pub struct OrderCreation;

pub const NAME: &str = "OrderCreation";

#[async_trait]
impl TestStage for OrderCreation {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let user_id = cx.user_id()?;
        let order = env.api.create_order(user_id).await?;

        if order.status.kind() != OrderStatusKind::Collecting {
            tracing::warn!(
                test_id = %cx.test_id,
                order_id = %order.id,
                status = %order.status.kind(),
                "Fresh order is not collecting"
            );
            return Ok(Continuation::Fail);
        }

        cx.assign_order(order.id)?;
        env.orders.insert(&cx.service_name, order.clone());
        cx.mark_stage_complete(NAME);

        tracing::debug!(test_id = %cx.test_id, order_id = %order.id, "Order created");

        if cx.params().stop_after_order_creation {
            return Ok(Continuation::Stop);
        }
        Ok(Continuation::Continue)
    }
}
