//! Order status state machine
//!
//! Declares the legal transitions of the order lifecycle and answers
//! whether an observed `(from, to)` pair is allowed. The table is built
//! once from a pair list and never mutated, so reads are lock-free.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use shared::models::{OrderStatus, OrderStatusKind};

/// Returned when the source state has no entry in the transition table,
/// distinguishing "state unknown" from "transition illegal".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unknown order state: {0}")]
pub struct UnknownState(pub OrderStatusKind);

/// Immutable legal-transition table keyed on [`OrderStatusKind`]
#[derive(Debug)]
pub struct OrderStateMachine {
    table: HashMap<OrderStatusKind, HashSet<OrderStatusKind>>,
}

impl OrderStateMachine {
    /// Build a machine from an explicit `(from, to)` pair list
    pub fn from_pairs(pairs: &[(OrderStatusKind, OrderStatusKind)]) -> Self {
        let mut table: HashMap<OrderStatusKind, HashSet<OrderStatusKind>> = HashMap::new();
        for (from, to) in pairs {
            table.entry(*from).or_default().insert(*to);
        }
        Self { table }
    }

    /// The authoritative order-lifecycle transition set
    pub fn standard() -> Self {
        use OrderStatusKind::*;

        let mut pairs = vec![
            (Collecting, Booked),
            (Collecting, Discarded),
            // Booking cancelled or payment deadline missed
            (Booked, Collecting),
            // Still awaiting payment, within deadline
            (Booked, Booked),
            (Booked, Payed),
            (Payed, InDelivery),
            (InDelivery, Delivered),
            (InDelivery, Refund),
        ];
        // Every state may degrade to Failed, recording its predecessor
        for from in OrderStatusKind::all() {
            pairs.push((from, Failed));
        }
        Self::from_pairs(&pairs)
    }

    /// Check whether `from -> to` is a legal transition
    ///
    /// Errors with [`UnknownState`] when `from` has no entry in the table.
    pub fn is_transition_allowed(
        &self,
        from: &OrderStatus,
        to: &OrderStatus,
    ) -> Result<bool, UnknownState> {
        let from = from.kind();
        let targets = self.table.get(&from).ok_or(UnknownState(from))?;
        Ok(targets.contains(&to.kind()))
    }
}

impl Default for OrderStateMachine {
    fn default() -> Self {
        Self::standard()
    }
}
