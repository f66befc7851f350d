//! User selection stage

use async_trait::async_trait;

use crate::context::TestContext;
use crate::error::StageResult;
use crate::stage::{Continuation, StageEnv, TestStage};

/// Picks a random pooled user and pins it to the context. Non-retryable.
pub struct ChooseUserAccount;

pub const NAME: &str = "ChooseUserAccount";

#[async_trait]
impl TestStage for ChooseUserAccount {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(&self, cx: &mut TestContext, env: &StageEnv) -> StageResult<Continuation> {
        let user_id = env.users.random_user(&cx.service_name)?;
        cx.assign_user(user_id)?;
        cx.mark_stage_complete(NAME);

        tracing::debug!(test_id = %cx.test_id, user_id = %user_id, "User selected");
        Ok(Continuation::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use crate::order_cache::OrderCache;
    use crate::sim::{SimulatedBehavior, SimulatedTarget};
    use crate::state_machine::OrderStateMachine;
    use crate::user_pool::UserPool;
    use shared::models::TestParams;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn env_with_users(count: u64) -> StageEnv {
        let api: Arc<SimulatedTarget> =
            Arc::new(SimulatedTarget::new(SimulatedBehavior::default()));
        let users = Arc::new(UserPool::new());
        users.create_users_pool("svc", count, 1000, api.as_ref()).await;
        StageEnv {
            service_name: "svc".to_string(),
            api,
            users,
            orders: Arc::new(OrderCache::new()),
            machine: Arc::new(OrderStateMachine::standard()),
            cancel: CancellationToken::new(),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_assigns_user_from_pool() {
        let env = env_with_users(3).await;
        let mut cx = TestContext::new(Arc::new(TestParams::new("svc")));

        let outcome = ChooseUserAccount.run(&mut cx, &env).await.unwrap();
        assert_eq!(outcome, Continuation::Continue);
        assert!(cx.user_id().is_ok());
        assert_eq!(cx.stages_complete, vec![NAME]);
    }

    #[tokio::test]
    async fn test_errors_without_users() {
        let env = env_with_users(0).await;
        let mut cx = TestContext::new(Arc::new(TestParams::new("svc")));

        let result = ChooseUserAccount.run(&mut cx, &env).await;
        assert!(matches!(result, Err(StageError::NoUsersForService(_))));
    }
}
