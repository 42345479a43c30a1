//! Persistence of orders and their swap legs
//!
//! The store is the only state shared between the chain loops and the order
//! pool. Every write touches a single swap or order row; order reads always
//! assemble the latest persisted leg rows.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::SwapperResult;
use crate::model::{AtomicSwap, Chain, Order};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// Counts for the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub orders_by_status: BTreeMap<String, u64>,
    pub active_swaps: u64,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Non-terminal legs of filled orders on `chain`
    async fn get_active_swaps(&self, chain: Chain) -> SwapperResult<Vec<AtomicSwap>>;

    async fn update_swap(&self, swap: &AtomicSwap) -> SwapperResult<()>;

    async fn swap_by_on_chain_identifier(&self, identifier: &str) -> SwapperResult<AtomicSwap>;

    /// Orders not yet in a terminal status
    async fn get_active_orders(&self) -> SwapperResult<Vec<Order>>;

    /// Write the order row (status, secret); legs are written separately
    async fn update_order(&self, order: &Order) -> SwapperResult<()>;

    async fn order_by_id(&self, id: i64) -> SwapperResult<Order>;

    async fn health_check(&self) -> SwapperResult<()>;

    async fn stats(&self) -> SwapperResult<StoreStats>;
}

/// Operator retry: rewind a failed order and its terminal legs one cycle
pub async fn retry_order(store: &dyn Store, id: i64) -> SwapperResult<Order> {
    let mut order = store.order_by_id(id).await?;
    let before = order.clone();
    order.retry()?;

    if order.initiator_atomic_swap != before.initiator_atomic_swap {
        store.update_swap(&order.initiator_atomic_swap).await?;
    }
    if order.follower_atomic_swap != before.follower_atomic_swap {
        store.update_swap(&order.follower_atomic_swap).await?;
    }
    store.update_order(&order).await?;

    info!("Order {} retried: {} -> {}", id, before.status, order.status);
    Ok(order)
}
