//! Delivery stage

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use shared::models::{DeliveryOutcome, FinancialOperation, OrderStatus, OrderStatusKind};

use crate::api::DELIVERY_SLACK;
use crate::awaiter::{AwaitOutcome, ConditionAwaiter};
use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::{Continuation, StageEnv, TestStage};
use crate::stages::fetch_and_observe;

/// Kicks off delivery on a paid order and audits its conclusion: a
/// delivered order must respect the promised slot and carry a successful
/// delivery log; a refunded one must pay back exactly what was withdrawn.
pub struct OrderDelivery;

pub const NAME: &str = "OrderDelivery";

#[async_trait]
impl TestStage for OrderDelivery {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let user_id = cx.user_id()?;
        let order_id = cx.order_id()?;

        let order = fetch_and_observe(cx, env).await?;
        if order.status.kind() != OrderStatusKind::Payed {
            return Err(StageError::failed(format!(
                "delivery requires a paid order, found {}",
                order.status.kind()
            )));
        }
        let delivery_duration = order
            .delivery_duration
            .ok_or_else(|| StageError::failed("paid order has no delivery slot"))?;
        let payment_time: DateTime<Utc> = order
            .last_payment()
            .ok_or_else(|| StageError::failed("paid order has no payment record"))?
            .timestamp;

        env.api.simulate_delivery(order_id).await?;

        let deadline = Duration::from_secs(delivery_duration.max(0) as u64) + DELIVERY_SLACK;
        let cx_ref: &TestContext = cx;
        let outcome = ConditionAwaiter::await_at_most(deadline, env.cancel.clone())
            .poll_interval(env.poll_interval)
            .start_waiting(
                move || async move {
                    let order = fetch_and_observe(cx_ref, env).await?;
                    Ok(matches!(
                        order.status.kind(),
                        OrderStatusKind::Delivered | OrderStatusKind::Refund
                    ))
                },
                || Err(StageError::failed("delivery did not conclude within the slot")),
            )
            .await?;
        if outcome == AwaitOutcome::Cancelled {
            return Ok(Continuation::Stop);
        }

        let order = fetch_and_observe(cx, env).await?;
        match order.status {
            OrderStatus::Delivered {
                delivery_finish_time,
                ..
            } => {
                let log = env.api.delivery_log(order_id).await?;
                if log.outcome != DeliveryOutcome::Success {
                    return Err(StageError::failed(
                        "delivery log disagrees with the delivered status",
                    ));
                }

                let promised = payment_time + chrono::Duration::seconds(delivery_duration);
                if delivery_finish_time > promised {
                    return Err(StageError::failed(format!(
                        "delivery finished at {} but was promised by {}",
                        delivery_finish_time, promised
                    )));
                }

                cx.mark_stage_complete(NAME);
                tracing::debug!(test_id = %cx.test_id, order_id = %order_id, "Order delivered");
                Ok(Continuation::Continue)
            }
            OrderStatus::Refund => {
                let history = env.api.financial_history(user_id, order_id).await?;
                let withdrawn: i64 = history
                    .iter()
                    .filter(|record| record.op == FinancialOperation::Withdraw)
                    .map(|record| record.amount)
                    .sum();
                let refunded: i64 = history
                    .iter()
                    .filter(|record| record.op == FinancialOperation::Refund)
                    .map(|record| record.amount)
                    .sum();
                if withdrawn != refunded {
                    return Err(StageError::failed(format!(
                        "refunded {} does not match withdrawn {}",
                        refunded, withdrawn
                    )));
                }

                // Mirror the refund so the local ledger matches the target
                env.users.refund(user_id, refunded)?;

                cx.mark_stage_complete(NAME);
                tracing::debug!(test_id = %cx.test_id, order_id = %order_id, "Order refunded");
                Ok(Continuation::Continue)
            }
            other => Err(StageError::IllegalTransition {
                from: OrderStatusKind::InDelivery,
                to: other.kind(),
            }),
        }
    }
}
