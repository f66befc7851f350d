//! Order finalization stage

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use shared::models::{BookingStatus, OrderStatusKind};

use crate::awaiter::{AwaitOutcome, ConditionAwaiter};
use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::{Continuation, StageEnv, TestStage};
use crate::stages::fetch_and_observe;

/// Deadline for the booked status to become observable after the
/// synchronous finalize call returns
const BOOKED_TIMEOUT: Duration = Duration::from_secs(5);

/// Books the collected items. A clean booking must surface as `Booked`;
/// a partial one (non-empty `failed_items`) must leave the order in
/// `Collecting`. The per-item booking log is audited against the
/// returned failure set either way.
pub struct OrderFinalizing;

pub const NAME: &str = "OrderFinalizing";

#[async_trait]
impl TestStage for OrderFinalizing {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let order_id = cx.order_id()?;
        let booking = env.api.finalize_order(order_id).await?;

        if booking.failed_items.is_empty() {
            let cx_ref: &TestContext = cx;
            let outcome = ConditionAwaiter::await_at_most(BOOKED_TIMEOUT, env.cancel.clone())
                .poll_interval(env.poll_interval)
                .start_waiting(
                    move || async move {
                        let order = fetch_and_observe(cx_ref, env).await?;
                        Ok(order.status.kind() == OrderStatusKind::Booked)
                    },
                    || Err(StageError::failed("booked order never became observable")),
                )
                .await?;
            if outcome == AwaitOutcome::Cancelled {
                return Ok(Continuation::Stop);
            }
        } else {
            let order = fetch_and_observe(cx, env).await?;
            if order.status.kind() != OrderStatusKind::Collecting {
                return Err(StageError::failed(format!(
                    "partially booked order is {} instead of collecting",
                    order.status.kind()
                )));
            }
        }

        let records = env.api.booking_history(booking.id).await?;
        let failed_in_log: HashSet<Uuid> = records
            .iter()
            .filter(|record| record.status == BookingStatus::Failed)
            .map(|record| record.item_id)
            .collect();
        if failed_in_log != booking.failed_items {
            return Err(StageError::failed(
                "booking log disagrees with the returned failed-item set",
            ));
        }

        cx.mark_finalized();
        cx.mark_stage_complete(NAME);
        tracing::debug!(
            test_id = %cx.test_id,
            booking_id = %booking.id,
            failed_items = booking.failed_items.len(),
            "Order finalized"
        );
        Ok(Continuation::Continue)
    }
}
