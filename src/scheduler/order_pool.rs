//! Order composition worker pool

use crate::alert::{AlertKind, Alerter};
use crate::error::{SwapperError, WatcherError, WatcherResult};
use crate::metrics;
use crate::model::{Order, OrderStatus};
use crate::shutdown::Shutdown;
use crate::status::{process_order, OrderTimeouts, OrderUpdate};
use crate::store::Store;

use chrono::Utc;
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const LOOP_NAME: &str = "order_pool";

/// Composes active orders from their legs with a fixed number of workers.
///
/// An order is handed to at most one worker at a time.
pub struct OrderPool {
    store: Arc<dyn Store>,
    alerter: Arc<Alerter>,
    timeouts: OrderTimeouts,
    workers: usize,
    poll_interval: Duration,
    halt_on_failed_hard: bool,
    in_flight: DashSet<i64>,
}

impl OrderPool {
    pub fn new(
        store: Arc<dyn Store>,
        alerter: Arc<Alerter>,
        timeouts: OrderTimeouts,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            alerter,
            timeouts,
            workers: workers.max(1),
            poll_interval,
            halt_on_failed_hard: true,
            in_flight: DashSet::new(),
        }
    }

    pub fn halt_on_failed_hard(mut self, halt: bool) -> Self {
        self.halt_on_failed_hard = halt;
        self
    }

    /// Dispatch active orders to the workers until shutdown, or until a
    /// worker reports a non-recoverable error.
    pub async fn run(self: Arc<Self>, shutdown: Shutdown) -> WatcherResult<()> {
        let (order_tx, order_rx) = mpsc::channel::<Order>(self.workers * 2);
        let order_rx = Arc::new(Mutex::new(order_rx));
        let (halt_tx, mut halt_rx) = mpsc::channel::<WatcherError>(1);

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let pool = self.clone();
            let order_rx = order_rx.clone();
            let halt_tx = halt_tx.clone();
            workers.spawn(async move {
                loop {
                    let next = order_rx.lock().await.recv().await;
                    let order = match next {
                        Some(order) => order,
                        None => break,
                    };
                    let id = order.id;
                    let result = pool.handle(order).await;
                    pool.in_flight.remove(&id);

                    if let Err(e) = result {
                        if e.is_non_recoverable() {
                            // Only the first halt is reported
                            let _ = halt_tx.try_send(e);
                            break;
                        }
                    }
                }
                debug!("Order worker {} stopped", worker_id);
            });
        }
        drop(halt_tx);

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Order pool started with {} workers", self.workers);
        metrics::record_loop_halted(LOOP_NAME, false);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => break Ok(()),
                Some(e) = halt_rx.recv() => break Err(e),
                _ = ticker.tick() => self.dispatch(&order_tx).await,
            }
        };

        drop(order_tx);
        drop(halt_rx);
        while workers.join_next().await.is_some() {}

        match &outcome {
            Ok(()) => info!("Order pool stopped"),
            Err(e) => {
                error!("Order pool halted: {}", e);
                metrics::record_loop_halted(LOOP_NAME, true);
            }
        }
        outcome
    }

    async fn dispatch(&self, order_tx: &mpsc::Sender<Order>) {
        let orders = match self.store.get_active_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Failed to load active orders: {}", e);
                return;
            }
        };

        for order in orders {
            let id = order.id;
            if !self.in_flight.insert(id) {
                continue;
            }
            if order_tx.try_send(order).is_err() {
                // Queue full; picked up on a later tick
                self.in_flight.remove(&id);
            }
        }
    }

    /// Compose every active order once, `workers` at a time.
    ///
    /// Returns the number of orders written, or the first non-recoverable
    /// error.
    pub async fn process_once(&self) -> WatcherResult<usize> {
        let orders = self
            .store
            .get_active_orders()
            .await
            .map_err(WatcherError::recoverable)?;

        let results: Vec<WatcherResult<bool>> = stream::iter(orders)
            .map(|order| self.handle(order))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut written = 0;
        let mut halt = None;
        for result in results {
            match result {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) if e.is_non_recoverable() => {
                    halt.get_or_insert(e);
                }
                Err(_) => {}
            }
        }
        match halt {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Compose one order and persist the change, if any.
    async fn handle(&self, order: Order) -> WatcherResult<bool> {
        let next = match process_order(&order, Utc::now(), &self.timeouts) {
            OrderUpdate::Unchanged => return Ok(false),
            OrderUpdate::Changed(next) => next,
        };

        if let Err(e) = self.store.update_order(&next).await {
            warn!("Failed to write order {}: {}", order.id, e);
            return Err(WatcherError::recoverable(e));
        }
        metrics::record_order_transition(order.status, next.status);

        if next.status == OrderStatus::FailedHard {
            self.alerter
                .alert(
                    AlertKind::FailedHard,
                    &format!("order {}", next.id),
                    &format!(
                        "initiator leg {}, follower leg {}",
                        next.initiator_atomic_swap.status, next.follower_atomic_swap.status
                    ),
                )
                .await;
            if self.halt_on_failed_hard {
                return Err(WatcherError::non_recoverable(SwapperError::FailedHard(
                    next.id,
                )));
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AtomicSwap, Chain, SwapStatus};
    use crate::store::MemoryStore;
    use chrono::Duration as ChronoDuration;
    use tokio_test::{assert_err, assert_ok};

    fn timeouts() -> OrderTimeouts {
        OrderTimeouts {
            order_timeout: ChronoDuration::seconds(600),
            swap_initiation_timeout: ChronoDuration::seconds(3600),
        }
    }

    fn order(status: OrderStatus, initiator: SwapStatus, follower: SwapStatus) -> Order {
        let mut initiator_leg = AtomicSwap::new(Chain::BitcoinRegtest, "ab".repeat(32));
        initiator_leg.status = initiator;
        let mut follower_leg = AtomicSwap::new(Chain::EthereumLocalnet, "ab".repeat(32));
        follower_leg.status = follower;
        Order {
            id: 0,
            maker: "maker".to_string(),
            taker: "taker".to_string(),
            initiator_atomic_swap: initiator_leg,
            follower_atomic_swap: follower_leg,
            secret_hash: "ab".repeat(32),
            secret: String::new(),
            created_at: Utc::now(),
            status,
        }
    }

    fn pool(store: Arc<MemoryStore>) -> OrderPool {
        OrderPool::new(
            store,
            Arc::new(Alerter::disabled()),
            timeouts(),
            2,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn composes_and_persists_outcomes() {
        let store = Arc::new(MemoryStore::new());
        let executed = store
            .insert_order(order(OrderStatus::Filled, SwapStatus::Redeemed, SwapStatus::Redeemed))
            .await;
        let pending = store
            .insert_order(order(OrderStatus::Filled, SwapStatus::Initiated, SwapStatus::NotStarted))
            .await;

        assert_eq!(pool(store.clone()).process_once().await.unwrap(), 1);
        assert_eq!(
            store.order_by_id(executed.id).await.unwrap().status,
            OrderStatus::Executed
        );
        assert_eq!(
            store.order_by_id(pending.id).await.unwrap().status,
            OrderStatus::Filled
        );
    }

    #[tokio::test]
    async fn stale_created_orders_are_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let mut stale = order(OrderStatus::Created, SwapStatus::NotStarted, SwapStatus::NotStarted);
        stale.created_at = Utc::now() - ChronoDuration::seconds(601);
        let stale = store.insert_order(stale).await;

        pool(store.clone()).process_once().await.unwrap();
        assert_eq!(
            store.order_by_id(stale.id).await.unwrap().status,
            OrderStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn failed_hard_halts_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let failed = store
            .insert_order(order(OrderStatus::Filled, SwapStatus::Redeemed, SwapStatus::Refunded))
            .await;

        let err = pool(store.clone()).process_once().await.unwrap_err();
        assert!(err.is_non_recoverable());
        assert!(matches!(err.source, SwapperError::FailedHard(id) if id == failed.id));
        // The outcome is written before halting
        assert_eq!(
            store.order_by_id(failed.id).await.unwrap().status,
            OrderStatus::FailedHard
        );
    }

    #[tokio::test]
    async fn failed_hard_is_alert_only_when_not_halting() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_order(order(OrderStatus::Filled, SwapStatus::Refunded, SwapStatus::Redeemed))
            .await;

        let pool = pool(store).halt_on_failed_hard(false);
        let written = assert_ok!(pool.process_once().await);
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn run_halts_on_failed_hard() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_order(order(OrderStatus::Filled, SwapStatus::Redeemed, SwapStatus::Refunded))
            .await;

        let err = assert_err!(Arc::new(pool(store)).run(Shutdown::never()).await);
        assert!(matches!(err.source, SwapperError::FailedHard(_)));
    }

    #[tokio::test]
    async fn run_returns_when_several_workers_fail_hard() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..6 {
            store
                .insert_order(order(
                    OrderStatus::Filled,
                    SwapStatus::Redeemed,
                    SwapStatus::Refunded,
                ))
                .await;
        }
        let pool = OrderPool::new(
            store,
            Arc::new(Alerter::disabled()),
            timeouts(),
            4,
            Duration::from_millis(10),
        );

        let run = tokio::time::timeout(
            Duration::from_secs(3),
            Arc::new(pool).run(Shutdown::never()),
        );
        let err = assert_err!(assert_ok!(run.await));
        assert!(matches!(err.source, SwapperError::FailedHard(_)));
    }

    #[tokio::test]
    async fn run_drains_workers_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let executed = store
            .insert_order(order(OrderStatus::Filled, SwapStatus::Redeemed, SwapStatus::Redeemed))
            .await;
        let (handle, shutdown) = crate::shutdown::channel();
        let pool = Arc::new(pool(store.clone()));

        let running = tokio::spawn(pool.clone().run(shutdown));
        for _ in 0..100 {
            if store.order_by_id(executed.id).await.unwrap().status == OrderStatus::Executed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.trigger();

        running.await.unwrap().unwrap();
        assert_eq!(
            store.order_by_id(executed.id).await.unwrap().status,
            OrderStatus::Executed
        );
    }
}
