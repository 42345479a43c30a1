//! Per-chain reconciliation loop

use crate::chain::ChainClient;
use crate::error::{Disposition, WatcherError, WatcherResult};
use crate::metrics;
use crate::model::{AtomicSwap, Chain};
use crate::shutdown::Shutdown;
use crate::status::{update_swap_status, SwapUpdate};
use crate::store::Store;
use crate::swap::{Watcher, WatcherFactory};

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one pass over a chain's active legs
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub swaps: usize,
    pub updated: usize,
    pub recoverable: usize,
    pub ignored: usize,
}

/// Reconciles every active leg on one chain, once per poll interval.
///
/// Watchers are built lazily per swap row and dropped once the leg leaves
/// the active set.
pub struct ChainLoop {
    chain: Chain,
    store: Arc<dyn Store>,
    factory: Arc<dyn WatcherFactory>,
    client: Option<ChainClient>,
    poll_interval: Duration,
    concurrency: usize,
    watchers: DashMap<i64, Arc<dyn Watcher>>,
}

impl ChainLoop {
    pub fn new(
        chain: Chain,
        store: Arc<dyn Store>,
        factory: Arc<dyn WatcherFactory>,
        poll_interval: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            chain,
            store,
            factory,
            client: None,
            poll_interval,
            concurrency: concurrency.max(1),
            watchers: DashMap::new(),
        }
    }

    /// Report tip height and connectivity for this chain on every tick
    pub fn with_client(mut self, client: ChainClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn name(&self) -> String {
        format!("chain:{}", self.chain)
    }

    /// Number of cached watchers
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Tick until shutdown or a non-recoverable error
    pub async fn run(&self, shutdown: Shutdown) -> WatcherResult<()> {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Chain loop for {} started", self.chain);
        metrics::record_loop_halted(&self.name(), false);

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            self.record_tip().await;

            match self.tick().await {
                Ok(report) => {
                    if report.updated > 0 || report.recoverable > 0 {
                        debug!("{} tick: {:?}", self.chain, report);
                    }
                }
                Err(e) if e.is_non_recoverable() => {
                    error!("Chain loop for {} halted: {}", self.chain, e);
                    metrics::record_loop_halted(&self.name(), true);
                    return Err(e);
                }
                Err(e) => warn!("Chain loop for {} tick failed: {}", self.chain, e),
            }

            metrics::record_tick_latency(self.chain, started.elapsed().as_secs_f64());
        }

        info!("Chain loop for {} stopped", self.chain);
        Ok(())
    }

    /// One pass over the active legs.
    ///
    /// Recoverable and ignorable failures of single legs are counted and
    /// logged; the first non-recoverable one is returned.
    pub async fn tick(&self) -> WatcherResult<TickReport> {
        let swaps = self
            .store
            .get_active_swaps(self.chain)
            .await
            .map_err(WatcherError::recoverable)?;

        let active: HashSet<i64> = swaps.iter().map(|s| s.id).collect();
        self.watchers.retain(|id, _| active.contains(id));

        let mut report = TickReport {
            swaps: swaps.len(),
            ..Default::default()
        };

        let results: Vec<(i64, WatcherResult<bool>)> = stream::iter(swaps)
            .map(|swap| async move {
                let id = swap.id;
                (id, self.process_swap(swap).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut halt = None;
        for (id, result) in results {
            match result {
                Ok(true) => report.updated += 1,
                Ok(false) => {}
                Err(e) => {
                    metrics::record_watcher_error(self.chain, e.disposition);
                    match e.disposition {
                        Disposition::Recoverable => {
                            report.recoverable += 1;
                            warn!("Swap {} on {}: {}", id, self.chain, e);
                        }
                        Disposition::Ignorable => {
                            report.ignored += 1;
                            debug!("Swap {} on {} skipped: {}", id, self.chain, e);
                        }
                        Disposition::NonRecoverable => {
                            error!("Swap {} on {}: {}", id, self.chain, e);
                            halt.get_or_insert(e);
                        }
                    }
                }
            }
        }

        match halt {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn process_swap(&self, swap: AtomicSwap) -> WatcherResult<bool> {
        let watcher = self.watcher_for(&swap)?;

        match update_swap_status(&swap, watcher.as_ref()).await? {
            SwapUpdate::Unchanged => Ok(false),
            SwapUpdate::Changed(next) => {
                self.store
                    .update_swap(&next)
                    .await
                    .map_err(WatcherError::recoverable)?;
                metrics::record_swap_transition(self.chain, swap.status, next.status);
                if !next.is_active() {
                    self.watchers.remove(&next.id);
                }
                Ok(true)
            }
        }
    }

    fn watcher_for(&self, swap: &AtomicSwap) -> WatcherResult<Arc<dyn Watcher>> {
        if let Some(watcher) = self.watchers.get(&swap.id) {
            return Ok(watcher.clone());
        }
        let watcher = self.factory.watcher(swap)?;
        self.watchers.insert(swap.id, watcher.clone());
        Ok(watcher)
    }

    async fn record_tip(&self) {
        if let Some(client) = &self.client {
            match client.tip().await {
                Ok(height) => {
                    metrics::record_chain_health(self.chain, true);
                    metrics::record_tip_height(self.chain, height);
                }
                Err(e) => {
                    metrics::record_chain_health(self.chain, false);
                    warn!("Failed to read {} tip: {}", self.chain, e);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use crate::error::{SwapperError, WatcherError, WatcherResult};
    use crate::model::AtomicSwap;
    use crate::status::swap::fake::FakeWatcher;
    use crate::swap::{Watcher, WatcherFactory};

    use dashmap::DashMap;
    use std::sync::Arc;

    /// Hands out pre-registered watchers keyed by swap id
    #[derive(Default)]
    pub struct FakeFactory {
        pub watchers: DashMap<i64, Arc<FakeWatcher>>,
        pub built: std::sync::atomic::AtomicUsize,
    }

    impl FakeFactory {
        pub fn register(&self, swap_id: i64, watcher: FakeWatcher) -> Arc<FakeWatcher> {
            let watcher = Arc::new(watcher);
            self.watchers.insert(swap_id, watcher.clone());
            watcher
        }
    }

    impl WatcherFactory for FakeFactory {
        fn watcher(&self, swap: &AtomicSwap) -> WatcherResult<Arc<dyn Watcher>> {
            self.built.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match self.watchers.get(&swap.id) {
                Some(w) => {
                    let watcher: Arc<dyn Watcher> = w.clone();
                    Ok(watcher)
                }
                None => Err(WatcherError::ignorable(SwapperError::NotFound {
                    kind: "watcher",
                    id: swap.id.to_string(),
                })),
            }
        }
    }
}
