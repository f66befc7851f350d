//! Abandoned-cart audit stage

use async_trait::async_trait;

use shared::models::OrderStatusKind;

use crate::api::{ABANDONED_SLEEP, BUCKET_REFRESH_TIMEOUT, DISCARD_TIMEOUT};
use crate::awaiter::{AwaitOutcome, ConditionAwaiter};
use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::{Continuation, StageEnv, TestStage};
use crate::stages::fetch_and_observe;

/// Leaves the cart untouched long enough for the target's abandoned-cart
/// sweep to classify it, then audits the sweep's verdict: an interacted
/// cart must stay `Collecting`, an untouched one must be `Discarded`.
///
/// When the cart is legitimately discarded there is nothing left to
/// drive, so the test ends neutrally.
pub struct OrderAbandoned;

pub const NAME: &str = "OrderAbandoned";

#[async_trait]
impl TestStage for OrderAbandoned {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let order_id = cx.order_id()?;

        let baseline = env
            .api
            .abandoned_card_history(order_id)
            .await?
            .last()
            .map(|record| record.timestamp);

        tokio::select! {
            _ = env.cancel.cancelled() => return Ok(Continuation::Stop),
            _ = tokio::time::sleep(ABANDONED_SLEEP) => {}
        }

        let outcome = ConditionAwaiter::await_at_most(BUCKET_REFRESH_TIMEOUT, env.cancel.clone())
            .poll_interval(env.poll_interval)
            .start_waiting(
                move || async move {
                    let history = env.api.abandoned_card_history(order_id).await?;
                    Ok(match (history.last(), baseline) {
                        (Some(record), Some(base)) => record.timestamp > base,
                        (Some(_), None) => true,
                        (None, _) => false,
                    })
                },
                || Err(StageError::failed("no fresh bucket-log record appeared")),
            )
            .await?;
        if outcome == AwaitOutcome::Cancelled {
            return Ok(Continuation::Stop);
        }

        let record = env
            .api
            .abandoned_card_history(order_id)
            .await?
            .last()
            .cloned()
            .ok_or_else(|| StageError::failed("bucket log vanished after refresh"))?;

        if record.user_interacted {
            let order = fetch_and_observe(cx, env).await?;
            if order.status.kind() != OrderStatusKind::Collecting {
                return Err(StageError::failed(format!(
                    "interacted cart moved to {} instead of staying in collection",
                    order.status.kind()
                )));
            }
            cx.mark_stage_complete(NAME);
            Ok(Continuation::Continue)
        } else {
            let cx_ref: &TestContext = cx;
            let outcome = ConditionAwaiter::await_at_most(DISCARD_TIMEOUT, env.cancel.clone())
                .poll_interval(env.poll_interval)
                .start_waiting(
                    move || async move {
                        let order = fetch_and_observe(cx_ref, env).await?;
                        Ok(order.status.kind() == OrderStatusKind::Discarded)
                    },
                    || Err(StageError::failed("untouched cart was never discarded")),
                )
                .await?;
            if outcome == AwaitOutcome::Cancelled {
                return Ok(Continuation::Stop);
            }
            cx.mark_stage_complete(NAME);
            tracing::debug!(test_id = %cx.test_id, order_id = %order_id, "Cart discarded by target");
            Ok(Continuation::Stop)
        }
    }
}
