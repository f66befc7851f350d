//! Simulated target service
//!
//! An in-memory implementation of [`ExternalServiceApi`] with scriptable
//! behavior: payment outcomes, delivery timing and verdict, partial
//! bookings, abandoned-cart sweeps and a couple of deliberate contract
//! violations. The scenario suite runs the full harness against it, and
//! it doubles as a smoke-test backend when no real target is around.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use shared::models::{
    BookingDto, BookingLogRecord, BookingStatus, BucketLogRecord, DeliveryLogRecord,
    DeliveryOutcome, FinancialLogRecord, FinancialOperation, Item, Order, OrderLine, OrderStatus,
    PaymentLogRecord, PaymentStatus, ServiceDescriptor, User,
};

use crate::api::{
    ApiError, ApiResult, ExternalApiFactory, ExternalServiceApi, ServiceRegistry,
};

/// How the simulated target answers payment attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentBehavior {
    /// Every attempt succeeds
    Succeed,
    /// Every attempt is rejected for insufficient funds
    InsufficientFunds,
    /// The first `n` attempts fail generically, then attempts succeed
    FailTimes(u32),
    /// Every attempt fails generically
    AlwaysFail,
}

/// Abandoned-cart sweep configuration
#[derive(Debug, Clone, Copy)]
pub struct SweepBehavior {
    /// Time between sweep passes over a collecting cart
    pub interval: Duration,
}

/// Scriptable behavior of a [`SimulatedTarget`]
#[derive(Debug, Clone)]
pub struct SimulatedBehavior {
    /// Catalog answered by `available_items`
    pub items: Vec<Item>,
    pub payment: PaymentBehavior,
    /// Slots offered for every order, in seconds
    pub delivery_slots: Vec<i64>,
    /// Actual time a simulated delivery spends in transit
    pub delivery_transit: Duration,
    pub delivery_outcome: DeliveryOutcome,
    /// Contract violation: jump straight to `Delivered` on payment
    pub pay_jumps_to_delivered: bool,
    /// Sweep collecting carts, discarding untouched ones
    pub abandoned_sweep: Option<SweepBehavior>,
    /// Reject this many `create_user` calls before accepting any
    pub fail_user_creations: u32,
    /// Fail this many items per booking
    pub booking_fail_items: usize,
}

impl Default for SimulatedBehavior {
    fn default() -> Self {
        Self {
            items: default_catalog(),
            payment: PaymentBehavior::Succeed,
            delivery_slots: vec![2, 3, 4],
            delivery_transit: Duration::from_millis(200),
            delivery_outcome: DeliveryOutcome::Success,
            pay_jumps_to_delivered: false,
            abandoned_sweep: None,
            fail_user_creations: 0,
            booking_fail_items: 0,
        }
    }
}

fn default_catalog() -> Vec<Item> {
    ["socks", "kettle", "lamp", "notebook"]
        .iter()
        .enumerate()
        .map(|(n, title)| Item {
            id: Uuid::new_v4(),
            title: (*title).to_string(),
            price: (n as i64 + 1) * 10,
            amount: 1_000,
        })
        .collect()
}

/// Per-order state behind the API
#[derive(Debug)]
struct SimOrder {
    order: Order,
    user_id: Uuid,
    bucket_log: Vec<BucketLogRecord>,
    financial: Vec<FinancialLogRecord>,
    delivery: Option<DeliveryLogRecord>,
    failed_payments_seen: u32,
}

/// In-memory stand-in for one target service
pub struct SimulatedTarget {
    behavior: SimulatedBehavior,
    users: DashMap<Uuid, User>,
    orders: DashMap<Uuid, Arc<Mutex<SimOrder>>>,
    bookings: DashMap<Uuid, Vec<BookingLogRecord>>,
    user_creation_failures_left: AtomicU32,
}

impl SimulatedTarget {
    pub fn new(behavior: SimulatedBehavior) -> Self {
        let failures = behavior.fail_user_creations;
        Self {
            behavior,
            users: DashMap::new(),
            orders: DashMap::new(),
            bookings: DashMap::new(),
            user_creation_failures_left: AtomicU32::new(failures),
        }
    }

    fn order_entry(&self, order_id: Uuid) -> ApiResult<Arc<Mutex<SimOrder>>> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ApiError::remote(format!("order {} not found", order_id)))
    }

    fn spawn_sweep(&self, entry: Arc<Mutex<SimOrder>>, sweep: SweepBehavior) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep.interval).await;
                let mut state = entry.lock().unwrap();
                if state.order.status.kind() != shared::models::OrderStatusKind::Collecting {
                    break;
                }
                let interacted = !state.order.items.is_empty();
                state.bucket_log.push(BucketLogRecord {
                    transaction_id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    user_interacted: interacted,
                });
                if !interacted {
                    state.order.status = OrderStatus::Discarded;
                    break;
                }
            }
        });
    }
}

#[async_trait]
impl ExternalServiceApi for SimulatedTarget {
    async fn create_user(&self, name: &str, account_amount: i64) -> ApiResult<User> {
        let rejected = self
            .user_creation_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if rejected {
            return Err(ApiError::remote("user registration temporarily unavailable"));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            account_amount,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> ApiResult<User> {
        self.users
            .get(&id)
            .map(|user| user.clone())
            .ok_or_else(|| ApiError::remote(format!("user {} not found", id)))
    }

    async fn financial_history(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> ApiResult<Vec<FinancialLogRecord>> {
        let entry = self.order_entry(order_id)?;
        let state = entry.lock().unwrap();
        if state.user_id != user_id {
            return Err(ApiError::remote("order belongs to another user"));
        }
        Ok(state.financial.clone())
    }

    async fn create_order(&self, user_id: Uuid) -> ApiResult<Order> {
        if !self.users.contains_key(&user_id) {
            return Err(ApiError::remote(format!("user {} not found", user_id)));
        }
        let order = Order {
            id: Uuid::new_v4(),
            time_created: Utc::now(),
            status: OrderStatus::Collecting,
            items: Default::default(),
            delivery_duration: None,
            payment_history: vec![],
        };
        let entry = Arc::new(Mutex::new(SimOrder {
            order: order.clone(),
            user_id,
            bucket_log: vec![],
            financial: vec![],
            delivery: None,
            failed_payments_seen: 0,
        }));
        self.orders.insert(order.id, entry.clone());

        if let Some(sweep) = self.behavior.abandoned_sweep {
            self.spawn_sweep(entry, sweep);
        }
        Ok(order)
    }

    async fn get_order(&self, user_id: Uuid, order_id: Uuid) -> ApiResult<Order> {
        let entry = self.order_entry(order_id)?;
        let state = entry.lock().unwrap();
        if state.user_id != user_id {
            return Err(ApiError::remote("order belongs to another user"));
        }
        Ok(state.order.clone())
    }

    async fn available_items(&self, _user_id: Uuid) -> ApiResult<Vec<Item>> {
        Ok(self.behavior.items.clone())
    }

    async fn put_item_to_order(
        &self,
        _user_id: Uuid,
        order_id: Uuid,
        item_id: Uuid,
        amount: i64,
    ) -> ApiResult<bool> {
        let item = match self.behavior.items.iter().find(|item| item.id == item_id) {
            Some(item) => item.clone(),
            None => return Ok(false),
        };

        let entry = self.order_entry(order_id)?;
        let mut state = entry.lock().unwrap();
        match state.order.status.kind() {
            shared::models::OrderStatusKind::Collecting => {}
            // Changing a booked order re-enters collection
            shared::models::OrderStatusKind::Booked => {
                state.order.status = OrderStatus::Collecting;
            }
            _ => return Ok(false),
        }
        state.order.items.insert(
            item_id,
            OrderLine {
                title: item.title,
                price: item.price,
                amount,
            },
        );
        Ok(true)
    }

    async fn finalize_order(&self, order_id: Uuid) -> ApiResult<BookingDto> {
        let entry = self.order_entry(order_id)?;
        let mut state = entry.lock().unwrap();
        if state.order.status.kind() != shared::models::OrderStatusKind::Collecting {
            return Err(ApiError::remote("only collecting orders can be finalized"));
        }

        let booking_id = Uuid::new_v4();
        let failed_items: HashSet<Uuid> = state
            .order
            .items
            .keys()
            .take(self.behavior.booking_fail_items)
            .copied()
            .collect();

        let now = Utc::now();
        let records: Vec<BookingLogRecord> = state
            .order
            .items
            .iter()
            .map(|(item_id, line)| BookingLogRecord {
                booking_id,
                item_id: *item_id,
                status: if failed_items.contains(item_id) {
                    BookingStatus::Failed
                } else {
                    BookingStatus::Success
                },
                amount: line.amount,
                timestamp: now,
            })
            .collect();
        self.bookings.insert(booking_id, records);

        if failed_items.is_empty() {
            state.order.status = OrderStatus::Booked;
        }
        Ok(BookingDto {
            id: booking_id,
            failed_items,
        })
    }

    async fn delivery_slots(&self, _order_id: Uuid) -> ApiResult<Vec<i64>> {
        Ok(self.behavior.delivery_slots.clone())
    }

    async fn set_delivery_time(&self, order_id: Uuid, time_seconds: i64) -> ApiResult<()> {
        let entry = self.order_entry(order_id)?;
        entry.lock().unwrap().order.delivery_duration = Some(time_seconds);
        Ok(())
    }

    async fn pay_order(&self, user_id: Uuid, order_id: Uuid) -> ApiResult<Order> {
        let entry = self.order_entry(order_id)?;
        let mut state = entry.lock().unwrap();
        if state.user_id != user_id {
            return Err(ApiError::remote("order belongs to another user"));
        }
        if state.order.status.kind() != shared::models::OrderStatusKind::Booked {
            return Err(ApiError::remote("only booked orders can be payed"));
        }

        let total = state.order.total();
        let now = Utc::now();
        let status = match self.behavior.payment {
            PaymentBehavior::Succeed => PaymentStatus::Success,
            PaymentBehavior::InsufficientFunds => PaymentStatus::FailedNotEnoughMoney,
            PaymentBehavior::AlwaysFail => PaymentStatus::Failed,
            PaymentBehavior::FailTimes(n) => {
                if state.failed_payments_seen < n {
                    state.failed_payments_seen += 1;
                    PaymentStatus::Failed
                } else {
                    PaymentStatus::Success
                }
            }
        };

        state.order.payment_history.push(PaymentLogRecord {
            timestamp: now,
            status,
            amount: total,
        });

        if status == PaymentStatus::Success {
            state.financial.push(FinancialLogRecord {
                op: FinancialOperation::Withdraw,
                amount: total,
                order_id: Some(order_id),
                timestamp: now,
            });
            state.order.status = if self.behavior.pay_jumps_to_delivered {
                OrderStatus::Delivered {
                    delivery_start_time: now,
                    delivery_finish_time: now,
                }
            } else {
                OrderStatus::Payed { payment_time: now }
            };
        }
        Ok(state.order.clone())
    }

    async fn simulate_delivery(&self, order_id: Uuid) -> ApiResult<()> {
        let entry = self.order_entry(order_id)?;
        {
            let mut state = entry.lock().unwrap();
            if state.order.status.kind() != shared::models::OrderStatusKind::Payed {
                return Err(ApiError::remote("only payed orders can be delivered"));
            }
            state.order.status = OrderStatus::InDelivery {
                delivery_start_time: Utc::now(),
            };
        }

        let transit = self.behavior.delivery_transit;
        let verdict = self.behavior.delivery_outcome;
        tokio::spawn(async move {
            tokio::time::sleep(transit).await;
            let mut state = entry.lock().unwrap();
            let start = match state.order.status {
                OrderStatus::InDelivery {
                    delivery_start_time,
                } => delivery_start_time,
                _ => return,
            };
            match verdict {
                DeliveryOutcome::Success => {
                    state.order.status = OrderStatus::Delivered {
                        delivery_start_time: start,
                        delivery_finish_time: Utc::now(),
                    };
                    state.delivery = Some(DeliveryLogRecord {
                        order_id,
                        outcome: DeliveryOutcome::Success,
                    });
                }
                DeliveryOutcome::Failure => {
                    let withdrawn: i64 = state
                        .financial
                        .iter()
                        .filter(|record| record.op == FinancialOperation::Withdraw)
                        .map(|record| record.amount)
                        .sum();
                    state.order.status = OrderStatus::Refund;
                    state.financial.push(FinancialLogRecord {
                        op: FinancialOperation::Refund,
                        amount: withdrawn,
                        order_id: Some(order_id),
                        timestamp: Utc::now(),
                    });
                    state.delivery = Some(DeliveryLogRecord {
                        order_id,
                        outcome: DeliveryOutcome::Failure,
                    });
                }
            }
        });
        Ok(())
    }

    async fn delivery_log(&self, order_id: Uuid) -> ApiResult<DeliveryLogRecord> {
        let entry = self.order_entry(order_id)?;
        let state = entry.lock().unwrap();
        state
            .delivery
            .clone()
            .ok_or_else(|| ApiError::remote("delivery has not concluded yet"))
    }

    async fn abandoned_card_history(&self, order_id: Uuid) -> ApiResult<Vec<BucketLogRecord>> {
        let entry = self.order_entry(order_id)?;
        let state = entry.lock().unwrap();
        Ok(state.bucket_log.clone())
    }

    async fn booking_history(&self, booking_id: Uuid) -> ApiResult<Vec<BookingLogRecord>> {
        self.bookings
            .get(&booking_id)
            .map(|records| records.clone())
            .ok_or_else(|| ApiError::remote(format!("booking {} not found", booking_id)))
    }
}

/// Registry-plus-factory over a set of simulated targets
#[derive(Default)]
pub struct SimulatedServices {
    targets: DashMap<String, Arc<SimulatedTarget>>,
}

impl SimulatedServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulated target under a service name
    pub fn register(&self, service_name: &str, target: Arc<SimulatedTarget>) {
        self.targets.insert(service_name.to_string(), target);
    }
}

impl ServiceRegistry for SimulatedServices {
    fn resolve(&self, service_name: &str) -> Option<ServiceDescriptor> {
        self.targets.get(service_name).map(|_| ServiceDescriptor {
            name: service_name.to_string(),
            base_url: format!("sim://{}", service_name),
            token: None,
        })
    }
}

impl ExternalApiFactory for SimulatedServices {
    fn connect(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> shared::Result<Arc<dyn ExternalServiceApi>> {
        self.targets
            .get(&descriptor.name)
            .map(|target| target.clone() as Arc<dyn ExternalServiceApi>)
            .ok_or_else(|| shared::Error::not_found("service", &descriptor.name))
    }
}
