//! User pool and credit ledger
//!
//! Creates users on the target once per flow and keeps a local mirror of
//! what each user's credit balance ought to be. Pool creation is
//! best-effort: individual create-user failures are logged and skipped.
//! The ledger deliberately permits negative balances; over-withdrawal is
//! asserted at the payment stage, not here.

use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use rand::Rng;
use uuid::Uuid;

use crate::api::ExternalServiceApi;
use crate::error::{StageError, StageResult};

/// Per-service user index plus an atomic credit counter per user
#[derive(Default)]
pub struct UserPool {
    users: DashMap<String, Vec<Uuid>>,
    ledger: DashMap<Uuid, AtomicI64>,
}

impl UserPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `count` users on the target and index the survivors
    ///
    /// Returns how many users were actually created. Failures are logged
    /// and skipped; callers decide whether a short pool is acceptable.
    pub async fn create_users_pool(
        &self,
        service: &str,
        count: u64,
        account_amount: i64,
        api: &dyn ExternalServiceApi,
    ) -> u64 {
        let mut created = 0;
        for n in 0..count {
            let name = format!("{}-load-user-{}", service, n);
            match api.create_user(&name, account_amount).await {
                Ok(user) => {
                    self.ledger.insert(user.id, AtomicI64::new(account_amount));
                    self.users.entry(service.to_string()).or_default().push(user.id);
                    created += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        service = service,
                        user_name = %name,
                        error = %e,
                        "Skipping user that could not be created"
                    );
                }
            }
        }
        tracing::info!(
            service = service,
            requested = count,
            created = created,
            "User pool ready"
        );
        created
    }

    /// Uniformly random user for the service
    pub fn random_user(&self, service: &str) -> StageResult<Uuid> {
        let users = self
            .users
            .get(service)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| StageError::NoUsersForService(service.to_string()))?;
        let idx = rand::thread_rng().gen_range(0..users.len());
        Ok(users[idx])
    }

    /// Number of pooled users for the service
    pub fn user_count(&self, service: &str) -> usize {
        self.users.get(service).map(|u| u.len()).unwrap_or(0)
    }

    /// Subtract from the user's mirrored credit, returning the new balance
    ///
    /// The result may go negative; callers assert on it.
    pub fn spend(&self, user_id: Uuid, amount: i64) -> StageResult<i64> {
        let counter = self
            .ledger
            .get(&user_id)
            .ok_or(StageError::UnknownUser(user_id))?;
        Ok(counter.fetch_sub(amount, Ordering::SeqCst) - amount)
    }

    /// Add back to the user's mirrored credit, returning the new balance
    pub fn refund(&self, user_id: Uuid, amount: i64) -> StageResult<i64> {
        let counter = self
            .ledger
            .get(&user_id)
            .ok_or(StageError::UnknownUser(user_id))?;
        Ok(counter.fetch_add(amount, Ordering::SeqCst) + amount)
    }

    /// Current mirrored balance
    pub fn balance(&self, user_id: Uuid) -> StageResult<i64> {
        let counter = self
            .ledger
            .get(&user_id)
            .ok_or(StageError::UnknownUser(user_id))?;
        Ok(counter.load(Ordering::SeqCst))
    }

    /// Mirrored balances of every pooled user of the service
    pub fn balances(&self, service: &str) -> Vec<i64> {
        self.users
            .get(service)
            .map(|users| {
                users
                    .iter()
                    .filter_map(|user| self.balance(*user).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}
