//! Data models for the harness and the target-service wire format

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// User account created on the target service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    /// Initial credit the harness expects the target to honor
    pub account_amount: i64,
}

/// Catalog item, read-only from the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub title: String,
    pub price: i64,
    pub amount: i64,
}

/// One line of an order's item map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub title: String,
    pub price: i64,
    pub amount: i64,
}

/// Order as observed on the target service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub time_created: DateTime<Utc>,
    pub status: OrderStatus,
    /// item id -> ordered line
    pub items: HashMap<Uuid, OrderLine>,
    /// Promised delivery duration in seconds, set once a slot is chosen
    pub delivery_duration: Option<i64>,
    /// Append-only payment attempts, oldest first
    pub payment_history: Vec<PaymentLogRecord>,
}

impl Order {
    /// Total price of all ordered lines
    pub fn total(&self) -> i64 {
        self.items
            .values()
            .map(|line| line.price * line.amount)
            .sum()
    }

    /// Most recent payment attempt, if any
    pub fn last_payment(&self) -> Option<&PaymentLogRecord> {
        self.payment_history.last()
    }
}

/// Order lifecycle status (closed set)
///
/// Payload-carrying arms record the observation times the delivery-stage
/// invariants are checked against. The transition table keys on
/// [`OrderStatusKind`], not on payload values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum OrderStatus {
    Collecting,
    Discarded,
    Booked,
    Payed {
        payment_time: DateTime<Utc>,
    },
    InDelivery {
        delivery_start_time: DateTime<Utc>,
    },
    Delivered {
        delivery_start_time: DateTime<Utc>,
        delivery_finish_time: DateTime<Utc>,
    },
    Refund,
    Failed {
        reason: String,
        previous: OrderStatusKind,
    },
}

impl OrderStatus {
    /// Payload-free discriminant of this status
    pub fn kind(&self) -> OrderStatusKind {
        match self {
            OrderStatus::Collecting => OrderStatusKind::Collecting,
            OrderStatus::Discarded => OrderStatusKind::Discarded,
            OrderStatus::Booked => OrderStatusKind::Booked,
            OrderStatus::Payed { .. } => OrderStatusKind::Payed,
            OrderStatus::InDelivery { .. } => OrderStatusKind::InDelivery,
            OrderStatus::Delivered { .. } => OrderStatusKind::Delivered,
            OrderStatus::Refund => OrderStatusKind::Refund,
            OrderStatus::Failed { .. } => OrderStatusKind::Failed,
        }
    }
}

/// Discriminant of [`OrderStatus`], used as the state-machine key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatusKind {
    Collecting,
    Discarded,
    Booked,
    Payed,
    InDelivery,
    Delivered,
    Refund,
    Failed,
}

impl OrderStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatusKind::Collecting => "Collecting",
            OrderStatusKind::Discarded => "Discarded",
            OrderStatusKind::Booked => "Booked",
            OrderStatusKind::Payed => "Payed",
            OrderStatusKind::InDelivery => "InDelivery",
            OrderStatusKind::Delivered => "Delivered",
            OrderStatusKind::Refund => "Refund",
            OrderStatusKind::Failed => "Failed",
        }
    }

    /// All variants, in declaration order
    pub fn all() -> [OrderStatusKind; 8] {
        [
            OrderStatusKind::Collecting,
            OrderStatusKind::Discarded,
            OrderStatusKind::Booked,
            OrderStatusKind::Payed,
            OrderStatusKind::InDelivery,
            OrderStatusKind::Delivered,
            OrderStatusKind::Refund,
            OrderStatusKind::Failed,
        ]
    }
}

impl std::fmt::Display for OrderStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single payment attempt on the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Failed,
    FailedNotEnoughMoney,
    Success,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::FailedNotEnoughMoney => "FAILED_NOT_ENOUGH_MONEY",
            PaymentStatus::Success => "SUCCESS",
        }
    }
}

/// One payment attempt, append-only on the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLogRecord {
    pub timestamp: DateTime<Utc>,
    pub status: PaymentStatus,
    pub amount: i64,
}

/// Financial operation type on the target's ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinancialOperation {
    Deposit,
    Withdraw,
    Refund,
}

/// Append-only financial ledger record read from the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialLogRecord {
    pub op: FinancialOperation,
    pub amount: i64,
    pub order_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// Abandoned-cart audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketLogRecord {
    pub transaction_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_interacted: bool,
}

/// Result of order finalization
///
/// `failed_items` holds the ids of items the target could not reserve;
/// the order stays in `Collecting` when it is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingDto {
    pub id: Uuid,
    pub failed_items: HashSet<Uuid>,
}

/// Per-item booking outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Success,
    Failed,
}

/// Per-item reservation record for a booking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingLogRecord {
    pub booking_id: Uuid,
    pub item_id: Uuid,
    pub status: BookingStatus,
    pub amount: i64,
    pub timestamp: DateTime<Utc>,
}

/// Terminal outcome of a simulated delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Success,
    Failure,
}

/// Delivery audit record read from the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLogRecord {
    pub order_id: Uuid,
    pub outcome: DeliveryOutcome,
}

/// Descriptor resolved from the (out of scope) service registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub base_url: String,
    /// Opaque credential handed to the HTTP adapter
    pub token: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_probability() -> f64 {
    0.5
}

fn default_poll_interval_ms() -> u64 {
    100
}

/// Request to start a testing flow for one target service
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TestParams {
    #[validate(length(min = 1, max = 255))]
    pub service_name: String,
    #[validate(range(min = 1))]
    pub number_of_users: u64,
    #[validate(range(min = 1))]
    pub number_of_tests: u64,
    #[validate(range(min = 1, max = 100_000))]
    pub rate_per_second: u32,
    /// Treat a successful payment as test success and skip delivery
    #[serde(default)]
    pub test_success_by_the_payment_fact: bool,
    /// End every test right after order creation (creation smoke mode)
    #[serde(default)]
    pub stop_after_order_creation: bool,
    /// Chance a test exercises the abandoned-cart path
    #[serde(default = "default_probability")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub abandon_probability: f64,
    /// Chance a test changes items again after finalization
    #[serde(default = "default_probability")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub change_items_probability: f64,
    /// Ramp the launch rate up instead of starting at full throughput
    #[serde(default = "default_true")]
    pub slow_start_on: bool,
    /// Awaiter polling interval for this flow
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl TestParams {
    /// Minimal params with the documented defaults, for tests and examples
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            number_of_users: 10,
            number_of_tests: 100,
            rate_per_second: 10,
            test_success_by_the_payment_fact: false,
            stop_after_order_creation: false,
            abandon_probability: default_probability(),
            change_items_probability: default_probability(),
            slow_start_on: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}
