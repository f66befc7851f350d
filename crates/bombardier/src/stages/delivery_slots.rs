//! Delivery slot selection stage

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::context::TestContext;
use crate::error::{StageError, StageResult};
use crate::stage::{Continuation, StageEnv, TestStage};
use crate::stages::fetch_and_observe;

/// Reads the available slots, books a random one and verifies the choice
/// is observable on re-read.
pub struct OrderSettingDeliverySlots;

pub const NAME: &str = "OrderSettingDeliverySlots";

#[async_trait]
impl TestStage for OrderSettingDeliverySlots {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let order_id = cx.order_id()?;

        let slots = env.api.delivery_slots(order_id).await?;
        let slot = {
            let mut rng = rand::thread_rng();
            *slots
                .choose(&mut rng)
                .ok_or_else(|| StageError::failed("target offers no delivery slots"))?
        };

        env.api.set_delivery_time(order_id, slot).await?;

        let order = fetch_and_observe(cx, env).await?;
        if order.delivery_duration != Some(slot) {
            return Err(StageError::failed(format!(
                "chosen delivery slot {} not observable on re-read (saw {:?})",
                slot, order.delivery_duration
            )));
        }

        cx.mark_stage_complete(NAME);
        tracing::debug!(test_id = %cx.test_id, order_id = %order_id, slot = slot, "Delivery slot set");
        Ok(Continuation::Continue)
    }
}
