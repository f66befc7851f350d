//! Order snapshot cache
//!
//! Last-seen order per `(service, order id)`. Writers are stages that
//! just read the order from the target; readers are later stages of the
//! same test. Stale reads are fine: the target stays the source of truth
//! and misses fall through to the API.

use dashmap::DashMap;
use uuid::Uuid;

use shared::models::Order;

#[derive(Default)]
pub struct OrderCache {
    orders: DashMap<(String, Uuid), Order>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest snapshot for the order
    pub fn insert(&self, service: &str, order: Order) {
        self.orders.insert((service.to_string(), order.id), order);
    }

    /// Last-seen snapshot, if any
    pub fn get(&self, service: &str, order_id: Uuid) -> Option<Order> {
        self.orders
            .get(&(service.to_string(), order_id))
            .map(|entry| entry.clone())
    }

    /// Drop the snapshot for a finished order
    pub fn remove(&self, service: &str, order_id: Uuid) {
        self.orders.remove(&(service.to_string(), order_id));
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shared::models::OrderStatus;
    use std::collections::HashMap;

    fn order(id: Uuid, status: OrderStatus) -> Order {
        Order {
            id,
            time_created: Utc::now(),
            status,
            items: HashMap::new(),
            delivery_duration: None,
            payment_history: vec![],
        }
    }

    #[test]
    fn test_insert_overwrites_last_snapshot() {
        let cache = OrderCache::new();
        let id = Uuid::new_v4();

        cache.insert("svc", order(id, OrderStatus::Collecting));
        cache.insert("svc", order(id, OrderStatus::Booked));

        let seen = cache.get("svc", id).unwrap();
        assert_eq!(seen.status, OrderStatus::Booked);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_services_are_isolated() {
        let cache = OrderCache::new();
        let id = Uuid::new_v4();

        cache.insert("svc-a", order(id, OrderStatus::Collecting));
        assert!(cache.get("svc-b", id).is_none());
    }

    #[test]
    fn test_remove() {
        let cache = OrderCache::new();
        let id = Uuid::new_v4();
        cache.insert("svc", order(id, OrderStatus::Collecting));
        cache.remove("svc", id);
        assert!(cache.get("svc", id).is_none());
        assert!(cache.is_empty());
    }
}
