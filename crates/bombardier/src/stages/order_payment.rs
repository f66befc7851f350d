//! Payment stage

use async_trait::async_trait;

use shared::models::{OrderStatusKind, PaymentStatus};

use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::{Continuation, StageEnv, TestStage};
use crate::stages::observe_order;

/// Pays the booked order and mirrors the withdrawal into the local
/// credit ledger. Generic payment failures request a retry (bounded by
/// the retry decorator); a not-enough-money answer is a business
/// failure, as is the target accepting payment past the user's credit.
pub struct OrderPayment;

pub const NAME: &str = "OrderPayment";

#[async_trait]
impl TestStage for OrderPayment {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let user_id = cx.user_id()?;
        let order_id = cx.order_id()?;

        let order = env.api.pay_order(user_id, order_id).await?;
        observe_order(cx, env, &order)?;

        let last = order
            .last_payment()
            .cloned()
            .ok_or_else(|| StageError::failed("payment produced no history record"))?;

        cx.payment_details.attempts += 1;
        cx.payment_details.last_status = Some(last.status);
        cx.payment_details.amount = last.amount;

        match last.status {
            PaymentStatus::Success => {
                if order.status.kind() != OrderStatusKind::Payed {
                    return Err(StageError::failed(format!(
                        "payment succeeded but the order is {}",
                        order.status.kind()
                    )));
                }

                let balance = env.users.spend(user_id, last.amount)?;
                if balance < 0 {
                    return Err(StageError::failed(format!(
                        "target accepted a payment of {} beyond the user's credit",
                        last.amount
                    )));
                }

                cx.mark_stage_complete(NAME);
                tracing::debug!(
                    test_id = %cx.test_id,
                    order_id = %order_id,
                    amount = last.amount,
                    "Order payed"
                );
                Ok(Continuation::Continue)
            }
            PaymentStatus::FailedNotEnoughMoney => {
                tracing::warn!(
                    test_id = %cx.test_id,
                    order_id = %order_id,
                    amount = last.amount,
                    "Payment rejected for insufficient funds"
                );
                Ok(Continuation::Fail)
            }
            PaymentStatus::Failed => {
                tracing::debug!(
                    test_id = %cx.test_id,
                    order_id = %order_id,
                    attempt = cx.payment_details.attempts,
                    "Payment failed, requesting retry"
                );
                Ok(Continuation::Retry)
            }
        }
    }
}
