//! Watcher scheduler
//!
//! One [`ChainLoop`] per enabled chain reconciles swap legs; a single
//! [`OrderPool`] composes order outcomes. They share nothing but the store.
//! A halted loop raises an alert and leaves the others running.

pub mod chain_loop;
pub mod order_pool;

pub use chain_loop::{ChainLoop, TickReport};
pub use order_pool::OrderPool;

use crate::alert::{AlertKind, Alerter};
use crate::chain::ChainManager;
use crate::config::Settings;
use crate::error::WatcherResult;
use crate::shutdown::Shutdown;
use crate::status::OrderTimeouts;
use crate::store::Store;
use crate::swap::WatcherFactory;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub struct Scheduler {
    chain_loops: Vec<Arc<ChainLoop>>,
    order_pool: Arc<OrderPool>,
    alerter: Arc<Alerter>,
}

impl Scheduler {
    pub fn new(
        chain_loops: Vec<Arc<ChainLoop>>,
        order_pool: Arc<OrderPool>,
        alerter: Arc<Alerter>,
    ) -> Self {
        Self {
            chain_loops,
            order_pool,
            alerter,
        }
    }

    /// Build one loop per enabled chain with a connected client
    pub fn from_settings(
        settings: &Settings,
        store: Arc<dyn Store>,
        chains: &ChainManager,
        factory: Arc<dyn WatcherFactory>,
        alerter: Arc<Alerter>,
    ) -> Self {
        let mut chain_loops = Vec::new();
        for (name, config) in settings.enabled_chains() {
            let client = match chains.get(config.chain) {
                Ok(client) => client,
                Err(e) => {
                    warn!("Not watching {}: {}", name, e);
                    continue;
                }
            };
            let chain_loop = ChainLoop::new(
                config.chain,
                store.clone(),
                factory.clone(),
                config.poll_interval(),
                settings.watcher.swap_concurrency,
            )
            .with_client(client);
            chain_loops.push(Arc::new(chain_loop));
        }

        let order_pool = OrderPool::new(
            store,
            alerter.clone(),
            OrderTimeouts::from_config(&settings.watcher),
            settings.watcher.order_workers,
            Duration::from_millis(settings.watcher.order_poll_interval_ms),
        )
        .halt_on_failed_hard(settings.watcher.halt_on_failed_hard);

        Self::new(chain_loops, Arc::new(order_pool), alerter)
    }

    /// Run every loop until shutdown. Returns once all of them have exited.
    pub async fn run(&self, shutdown: Shutdown) {
        let mut tasks: JoinSet<(String, WatcherResult<()>)> = JoinSet::new();

        for chain_loop in &self.chain_loops {
            let chain_loop = chain_loop.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                let result = chain_loop.run(shutdown).await;
                (chain_loop.name(), result)
            });
        }
        {
            let pool = self.order_pool.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                (order_pool::LOOP_NAME.to_string(), pool.run(shutdown).await)
            });
        }

        info!("Scheduler started {} chain loops", self.chain_loops.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    self.alerter
                        .alert(AlertKind::LoopHalted, &name, &e.to_string())
                        .await;
                }
                Err(e) => {
                    self.alerter
                        .alert(AlertKind::LoopHalted, "scheduler task", &e.to_string())
                        .await;
                }
            }
        }

        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::chain_loop::fake::FakeFactory;
    use super::*;
    use crate::error::{SwapperError, WatcherError};
    use crate::model::{AtomicSwap, Chain, Order, OrderStatus};
    use crate::store::MemoryStore;
    use crate::swap::Watcher;
    use chrono::Utc;

    struct BrokenFactory;

    impl WatcherFactory for BrokenFactory {
        fn watcher(&self, swap: &AtomicSwap) -> WatcherResult<Arc<dyn Watcher>> {
            Err(WatcherError::non_recoverable(SwapperError::ChainNotFound(swap.chain)))
        }
    }

    fn filled_order(initiator: Chain, follower: Chain) -> Order {
        Order {
            id: 0,
            maker: "maker".to_string(),
            taker: "taker".to_string(),
            initiator_atomic_swap: AtomicSwap::new(initiator, "ab".repeat(32)),
            follower_atomic_swap: AtomicSwap::new(follower, "ab".repeat(32)),
            secret_hash: "ab".repeat(32),
            secret: String::new(),
            created_at: Utc::now(),
            status: OrderStatus::Filled,
        }
    }

    #[tokio::test]
    async fn halted_loop_leaves_the_others_running() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_order(filled_order(Chain::BitcoinRegtest, Chain::EthereumLocalnet))
            .await;

        let broken = Arc::new(ChainLoop::new(
            Chain::BitcoinRegtest,
            store.clone(),
            Arc::new(BrokenFactory),
            Duration::from_millis(10),
            1,
        ));
        let healthy = Arc::new(ChainLoop::new(
            Chain::EthereumLocalnet,
            store.clone(),
            Arc::new(FakeFactory::default()),
            Duration::from_millis(10),
            1,
        ));
        let pool = Arc::new(OrderPool::new(
            store,
            Arc::new(Alerter::disabled()),
            OrderTimeouts {
                order_timeout: chrono::Duration::seconds(600),
                swap_initiation_timeout: chrono::Duration::seconds(3600),
            },
            1,
            Duration::from_millis(10),
        ));
        let scheduler = Scheduler::new(
            vec![broken.clone(), healthy],
            pool,
            Arc::new(Alerter::disabled()),
        );

        let (handle, shutdown) = crate::shutdown::channel();
        let running = tokio::spawn(async move { scheduler.run(shutdown).await });

        // The broken loop exits by itself; the rest need the shutdown signal
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!running.is_finished());
        handle.trigger();
        running.await.unwrap();

        assert_eq!(broken.watcher_count(), 0);
    }
}
