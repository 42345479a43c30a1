//! In-process store for development and tests

use super::{Store, StoreStats};
use crate::error::{SwapperError, SwapperResult};
use crate::model::{AtomicSwap, Chain, Order, OrderStatus};

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct OrderRow {
    order: Order,
    initiator_swap_id: i64,
    follower_swap_id: i64,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    swaps: BTreeMap<i64, AtomicSwap>,
    orders: BTreeMap<i64, OrderRow>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn assemble(&self, row: &OrderRow) -> SwapperResult<Order> {
        let leg = |id: i64| {
            self.swaps.get(&id).cloned().ok_or_else(|| SwapperError::NotFound {
                kind: "swap",
                id: id.to_string(),
            })
        };
        let mut order = row.order.clone();
        order.initiator_atomic_swap = leg(row.initiator_swap_id)?;
        order.follower_atomic_swap = leg(row.follower_swap_id)?;
        Ok(order)
    }

    fn is_active_swap(&self, id: i64) -> bool {
        self.orders.values().any(|row| {
            row.order.status == OrderStatus::Filled
                && (row.initiator_swap_id == id || row.follower_swap_id == id)
        })
    }
}

/// Store backed by in-process maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an order and its legs, assigning ids
    pub async fn insert_order(&self, mut order: Order) -> Order {
        let mut tables = self.tables.write().await;

        let initiator_swap_id = tables.next_id();
        order.initiator_atomic_swap.id = initiator_swap_id;
        let follower_swap_id = tables.next_id();
        order.follower_atomic_swap.id = follower_swap_id;
        order.id = tables.next_id();

        tables
            .swaps
            .insert(initiator_swap_id, order.initiator_atomic_swap.clone());
        tables
            .swaps
            .insert(follower_swap_id, order.follower_atomic_swap.clone());
        tables.orders.insert(
            order.id,
            OrderRow {
                order: order.clone(),
                initiator_swap_id,
                follower_swap_id,
            },
        );
        debug!("Inserted order {}", order.id);
        order
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_active_swaps(&self, chain: Chain) -> SwapperResult<Vec<AtomicSwap>> {
        let tables = self.tables.read().await;
        Ok(tables
            .swaps
            .values()
            .filter(|swap| {
                swap.chain == chain && swap.is_active() && tables.is_active_swap(swap.id)
            })
            .cloned()
            .collect())
    }

    async fn update_swap(&self, swap: &AtomicSwap) -> SwapperResult<()> {
        let mut tables = self.tables.write().await;
        match tables.swaps.get_mut(&swap.id) {
            Some(row) => {
                // Agreed terms are fixed at insert; only progress is written
                row.on_chain_identifier = swap.on_chain_identifier.clone();
                row.initiate_tx_hash = swap.initiate_tx_hash.clone();
                row.redeem_tx_hash = swap.redeem_tx_hash.clone();
                row.refund_tx_hash = swap.refund_tx_hash.clone();
                row.secret = swap.secret.clone();
                row.current_confirmations = swap.current_confirmations;
                row.filled_amount = swap.filled_amount.clone();
                row.initiate_block_number = swap.initiate_block_number;
                row.status = swap.status;
                Ok(())
            }
            None => Err(SwapperError::NotFound {
                kind: "swap",
                id: swap.id.to_string(),
            }),
        }
    }

    async fn swap_by_on_chain_identifier(&self, identifier: &str) -> SwapperResult<AtomicSwap> {
        self.tables
            .read()
            .await
            .swaps
            .values()
            .find(|swap| swap.on_chain_identifier == identifier)
            .cloned()
            .ok_or_else(|| SwapperError::NotFound {
                kind: "swap",
                id: identifier.to_string(),
            })
    }

    async fn get_active_orders(&self) -> SwapperResult<Vec<Order>> {
        let tables = self.tables.read().await;
        tables
            .orders
            .values()
            .filter(|row| !row.order.status.is_terminal())
            .map(|row| tables.assemble(row))
            .collect()
    }

    async fn update_order(&self, order: &Order) -> SwapperResult<()> {
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(&order.id) {
            Some(row) => {
                row.order.status = order.status;
                row.order.secret = order.secret.clone();
                Ok(())
            }
            None => Err(SwapperError::NotFound {
                kind: "order",
                id: order.id.to_string(),
            }),
        }
    }

    async fn order_by_id(&self, id: i64) -> SwapperResult<Order> {
        let tables = self.tables.read().await;
        let row = tables.orders.get(&id).ok_or_else(|| SwapperError::NotFound {
            kind: "order",
            id: id.to_string(),
        })?;
        tables.assemble(row)
    }

    async fn health_check(&self) -> SwapperResult<()> {
        Ok(())
    }

    async fn stats(&self) -> SwapperResult<StoreStats> {
        let tables = self.tables.read().await;
        let mut stats = StoreStats::default();
        for row in tables.orders.values() {
            *stats
                .orders_by_status
                .entry(row.order.status.to_string())
                .or_default() += 1;
        }
        stats.active_swaps = tables
            .swaps
            .values()
            .filter(|swap| swap.is_active() && tables.is_active_swap(swap.id))
            .count() as u64;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SwapStatus;
    use chrono::Utc;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: 0,
            maker: "maker".to_string(),
            taker: "taker".to_string(),
            initiator_atomic_swap: AtomicSwap::new(Chain::BitcoinRegtest, "ab".repeat(32)),
            follower_atomic_swap: AtomicSwap::new(Chain::EthereumLocalnet, "ab".repeat(32)),
            secret_hash: "ab".repeat(32),
            secret: String::new(),
            created_at: Utc::now(),
            status,
        }
    }

    #[tokio::test]
    async fn only_legs_of_filled_orders_are_active() {
        let store = MemoryStore::new();
        store.insert_order(order(OrderStatus::Created)).await;
        let filled = store.insert_order(order(OrderStatus::Filled)).await;

        let active = store.get_active_swaps(Chain::BitcoinRegtest).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, filled.initiator_atomic_swap.id);

        let mut redeemed = active[0].clone();
        redeemed.status = SwapStatus::Redeemed;
        store.update_swap(&redeemed).await.unwrap();
        assert!(store
            .get_active_swaps(Chain::BitcoinRegtest)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn orders_read_latest_legs() {
        let store = MemoryStore::new();
        let inserted = store.insert_order(order(OrderStatus::Filled)).await;

        let mut leg = inserted.follower_atomic_swap.clone();
        leg.on_chain_identifier = "0xorder".to_string();
        leg.status = SwapStatus::Detected;
        store.update_swap(&leg).await.unwrap();

        let orders = store.get_active_orders().await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].follower_atomic_swap.status, SwapStatus::Detected);
        assert_eq!(
            store.swap_by_on_chain_identifier("0xorder").await.unwrap().id,
            leg.id
        );
    }

    #[tokio::test]
    async fn order_write_leaves_legs_alone() {
        let store = MemoryStore::new();
        let inserted = store.insert_order(order(OrderStatus::Filled)).await;

        let mut leg = inserted.initiator_atomic_swap.clone();
        leg.status = SwapStatus::Initiated;
        store.update_swap(&leg).await.unwrap();

        // Stale copy of the order with an old leg
        let mut stale = inserted.clone();
        stale.status = OrderStatus::Cancelled;
        store.update_order(&stale).await.unwrap();

        let stored = store.order_by_id(inserted.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.initiator_atomic_swap.status, SwapStatus::Initiated);
        assert!(store.get_active_orders().await.unwrap().is_empty());

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.orders_by_status.get("cancelled"), Some(&1));
        assert_eq!(stats.active_swaps, 0);
    }

    #[tokio::test]
    async fn swap_write_keeps_agreed_terms() {
        let store = MemoryStore::new();
        let inserted = store.insert_order(order(OrderStatus::Filled)).await;

        let mut leg = inserted.initiator_atomic_swap.clone();
        leg.secret_hash = "cd".repeat(32);
        leg.amount = "1".to_string();
        leg.secret = "ef".repeat(32);
        leg.status = SwapStatus::Redeemed;
        store.update_swap(&leg).await.unwrap();

        let stored = store
            .order_by_id(inserted.id)
            .await
            .unwrap()
            .initiator_atomic_swap;
        assert_eq!(stored.secret_hash, "ab".repeat(32));
        assert_eq!(stored.amount, inserted.initiator_atomic_swap.amount);
        assert_eq!(stored.secret, "ef".repeat(32));
        assert_eq!(stored.status, SwapStatus::Redeemed);
    }

    #[tokio::test]
    async fn unknown_rows_are_not_found() {
        let store = MemoryStore::new();
        let mut ghost = AtomicSwap::new(Chain::Bitcoin, "");
        ghost.id = 42;
        assert!(matches!(
            store.update_swap(&ghost).await,
            Err(SwapperError::NotFound { kind: "swap", .. })
        ));
        assert!(store.order_by_id(7).await.is_err());
    }
}
