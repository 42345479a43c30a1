//! Order outcome composed from its two legs
//!
//! Pure function of the leg statuses and elapsed time. Precedence:
//! `FailedHard`, `FailedSoft`, `Executed`, created-timeout cancel,
//! initiation-timeout cancel, otherwise unchanged.

use crate::config::WatcherConfig;
use crate::model::{Order, OrderStatus, SwapStatus};

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};

/// Deadlines counted from `Order::created_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTimeouts {
    /// Unfilled orders are cancelled after this
    pub order_timeout: Duration,
    /// Filled orders with no leg started are cancelled after this
    pub swap_initiation_timeout: Duration,
}

impl OrderTimeouts {
    pub fn from_config(config: &WatcherConfig) -> Self {
        Self {
            order_timeout: Duration::seconds(config.order_timeout_secs as i64),
            swap_initiation_timeout: Duration::seconds(config.swap_initiation_timeout_secs as i64),
        }
    }
}

/// Result of composing one order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderUpdate {
    /// Nothing to write
    Unchanged,
    Changed(Order),
}

fn composed_status(
    order: &Order,
    now: DateTime<Utc>,
    timeouts: &OrderTimeouts,
) -> Option<OrderStatus> {
    use SwapStatus::*;

    let initiator = order.initiator_atomic_swap.status;
    let follower = order.follower_atomic_swap.status;

    match (initiator, follower) {
        (Redeemed, Refunded) | (Refunded, Redeemed) => return Some(OrderStatus::FailedHard),
        (Refunded, Refunded | NotStarted) | (NotStarted, Refunded) => {
            return Some(OrderStatus::FailedSoft)
        }
        (Redeemed, Redeemed) => return Some(OrderStatus::Executed),
        _ => {}
    }

    match order.status {
        OrderStatus::Created if now >= order.created_at + timeouts.order_timeout => {
            Some(OrderStatus::Cancelled)
        }
        OrderStatus::Filled
            if initiator == NotStarted
                && follower == NotStarted
                && now >= order.created_at + timeouts.swap_initiation_timeout =>
        {
            Some(OrderStatus::Cancelled)
        }
        _ => None,
    }
}

/// Compose `order`'s outcome as of `now`.
///
/// Terminal orders are never changed. The shared secret is copied from the
/// first leg that revealed one, follower first, and never cleared.
pub fn process_order(order: &Order, now: DateTime<Utc>, timeouts: &OrderTimeouts) -> OrderUpdate {
    if order.status.is_terminal() {
        return OrderUpdate::Unchanged;
    }

    let mut next = order.clone();
    if next.secret.is_empty() {
        let revealed = [&order.follower_atomic_swap, &order.initiator_atomic_swap]
            .into_iter()
            .map(|leg| leg.secret.as_str())
            .find(|secret| !secret.is_empty());
        if let Some(secret) = revealed {
            next.secret = secret.to_string();
        }
    }

    if let Some(status) = composed_status(order, now, timeouts) {
        match status {
            OrderStatus::FailedHard => error!(
                "Order {} FAILED HARD: initiator leg {}, follower leg {}",
                order.id, order.initiator_atomic_swap.status, order.follower_atomic_swap.status
            ),
            _ => info!("Order {} {} -> {}", order.id, order.status, status),
        }
        next.status = status;
    }

    if next == *order {
        OrderUpdate::Unchanged
    } else {
        OrderUpdate::Changed(next)
    }
}
