//! Item collection stage

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

use shared::models::OrderStatusKind;

use crate::api::ITEM_VISIBILITY_TIMEOUT;
use crate::awaiter::{AwaitOutcome, ConditionAwaiter};
use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::{Continuation, StageEnv, TestStage};
use crate::stages::fetch_and_observe;

/// Most distinct items one test puts into an order
const MAX_DISTINCT_ITEMS: usize = 3;

/// Largest per-item amount a test orders
const MAX_ITEM_AMOUNT: i64 = 10;

/// Fills the collecting order with a random selection of catalog items,
/// waiting after each put until the snapshot reflects the exact amount.
pub struct OrderCollecting;

pub const NAME: &str = "OrderCollecting";

#[async_trait]
impl TestStage for OrderCollecting {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let user_id = cx.user_id()?;
        let order_id = cx.order_id()?;

        let catalog = env.api.available_items(user_id).await?;
        if catalog.is_empty() {
            return Err(StageError::failed("target offers no purchasable items"));
        }

        let picks: Vec<(Uuid, i64)> = {
            let mut rng = rand::thread_rng();
            let count = rng.gen_range(1..=catalog.len().min(MAX_DISTINCT_ITEMS));
            let chosen: Vec<Uuid> = catalog
                .choose_multiple(&mut rng, count)
                .map(|item| item.id)
                .collect();
            chosen
                .into_iter()
                .map(|id| (id, rng.gen_range(1..=MAX_ITEM_AMOUNT)))
                .collect()
        };

        for (item_id, amount) in picks {
            let accepted = env
                .api
                .put_item_to_order(user_id, order_id, item_id, amount)
                .await?;
            if !accepted {
                return Err(StageError::failed(format!(
                    "target rejected item {} for order {}",
                    item_id, order_id
                )));
            }

            let cx_ref: &TestContext = cx;
            let outcome = ConditionAwaiter::await_at_most(
                ITEM_VISIBILITY_TIMEOUT,
                env.cancel.clone(),
            )
            .poll_interval(env.poll_interval)
            .start_waiting(
                move || async move {
                    let order = fetch_and_observe(cx_ref, env).await?;
                    Ok(order.status.kind() == OrderStatusKind::Collecting
                        && order.items.get(&item_id).map(|line| line.amount) == Some(amount))
                },
                move || {
                    Err(StageError::failed(format!(
                        "item {} never became visible with amount {}",
                        item_id, amount
                    )))
                },
            )
            .await?;

            if outcome == AwaitOutcome::Cancelled {
                return Ok(Continuation::Stop);
            }
        }

        cx.mark_stage_complete(NAME);
        Ok(Continuation::Continue)
    }
}
