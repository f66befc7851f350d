//! External service API contract
//!
//! The narrow set of target-service operations the stages depend on. The
//! production implementation is an HTTP adapter with token refresh and
//! lives outside this crate; tests and smoke runs use
//! [`crate::sim::SimulatedTarget`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use shared::models::{
    BookingDto, BookingLogRecord, BucketLogRecord, DeliveryLogRecord, FinancialLogRecord, Item,
    Order, ServiceDescriptor, User,
};

/// Remote-or-transport error surfaced by API calls
#[derive(Debug, Error)]
pub enum ApiError {
    /// Could not reach the target (connection, timeout, protocol)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The target answered with an error response
    #[error("Remote error: {0}")]
    Remote(String),

    /// The target answered with a payload we could not decode
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    /// Create a transport error
    pub fn transport(details: impl Into<String>) -> Self {
        ApiError::Transport(details.into())
    }

    /// Create a remote error
    pub fn remote(details: impl Into<String>) -> Self {
        ApiError::Remote(details.into())
    }
}

/// Convenience result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Operations consumed from one target service
///
/// Each call is an asynchronous request-response against the service the
/// instance was connected to. Stages never catch [`ApiError`]s; the
/// exception-free stage decorator classifies them.
#[async_trait]
pub trait ExternalServiceApi: Send + Sync {
    /// Create a user with the given starting credit
    async fn create_user(&self, name: &str, account_amount: i64) -> ApiResult<User>;

    /// Fetch a user by id
    async fn get_user(&self, id: Uuid) -> ApiResult<User>;

    /// Financial ledger records for a user scoped to one order
    async fn financial_history(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> ApiResult<Vec<FinancialLogRecord>>;

    /// Create a fresh order; the target returns it in `Collecting`
    async fn create_order(&self, user_id: Uuid) -> ApiResult<Order>;

    /// Fetch the current order snapshot
    async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> ApiResult<Order>;

    /// Items currently purchasable by the user
    async fn available_items(&self, user_id: Uuid) -> ApiResult<Vec<Item>>;

    /// Put `amount` of an item into the order; `false` means rejected
    async fn put_item_to_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        item_id: Uuid,
        amount: i64,
    ) -> ApiResult<bool>;

    /// Finalize (book) the order synchronously
    async fn finalize_order(&self, order_id: Uuid) -> ApiResult<BookingDto>;

    /// Delivery slots available for the order, in seconds
    async fn delivery_slots(&self, order_id: Uuid) -> ApiResult<Vec<i64>>;

    /// Choose a delivery slot for the order
    async fn set_delivery_time(&self, order_id: Uuid, time_seconds: i64) -> ApiResult<()>;

    /// Attempt payment; the returned order carries the updated payment history
    async fn pay_order(&self, user_id: Uuid, order_id: Uuid) -> ApiResult<Order>;

    /// Kick off delivery simulation on the target
    async fn simulate_delivery(&self, order_id: Uuid) -> ApiResult<()>;

    /// Delivery audit record for the order, once delivery concluded
    async fn delivery_log(&self, order_id: Uuid) -> ApiResult<DeliveryLogRecord>;

    /// Abandoned-cart audit records for the order, oldest first
    async fn abandoned_card_history(&self, order_id: Uuid) -> ApiResult<Vec<BucketLogRecord>>;

    /// Per-item reservation records for a booking
    async fn booking_history(&self, booking_id: Uuid) -> ApiResult<Vec<BookingLogRecord>>;
}

/// Lookup from service name to descriptor (implemented out of scope)
pub trait ServiceRegistry: Send + Sync {
    fn resolve(&self, service_name: &str) -> Option<ServiceDescriptor>;
}

/// Connects an [`ExternalServiceApi`] for a resolved descriptor
///
/// The production factory builds the authenticated HTTP adapter; test
/// factories hand back simulated targets.
pub trait ExternalApiFactory: Send + Sync {
    fn connect(&self, descriptor: &ServiceDescriptor) -> shared::Result<Arc<dyn ExternalServiceApi>>;
}

/// Deadline for a single item to become visible on the order
pub const ITEM_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(3);

/// Deadline for an untouched cart to be discarded by the target
pub const DISCARD_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for a fresh bucket-log record to appear
pub const BUCKET_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle time before the abandoned-cart sweep is expected to notice us
pub const ABANDONED_SLEEP: Duration = Duration::from_secs(120);

/// Slack granted on top of the promised delivery duration
pub const DELIVERY_SLACK: Duration = Duration::from_secs(5);
