//! HTLC swap protocol roles
//!
//! Three capabilities, implemented once per chain family:
//! - [`Watcher`]: read-only observer of one leg, no key required
//! - [`InitiatorSwap`]: locks funds and reclaims them after expiry
//! - [`RedeemerSwap`]: claims locked funds with the secret
//!
//! Dispatch over the family happens once, in [`ChainWatcherFactory`] and the
//! role constructors; everything downstream works on trait objects.

pub mod account;
pub mod orchestrator;
pub mod utxo;
pub mod wait;

pub use orchestrator::{run_follower, run_initiator, SwapOutcome};
pub use wait::Backoff;

use crate::chain::confirmations::effective_minimum;
use crate::chain::{ChainClient, ChainManager};
use crate::config::{ChainConfig, Settings};
use crate::error::{SwapperError, WatcherError, WatcherResult};
use crate::model::{AtomicSwap, Chain, ChainFamily};
use crate::screener::Screener;
use crate::shutdown::Shutdown;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// Deposit evidence for one leg
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitiateStatus {
    /// Locked value covers the required amount
    pub detected: bool,
    /// Confirmation threshold met by every contributing transaction
    pub initiated: bool,
    /// Contributing transactions, comma-joined
    pub tx_hash: String,
    /// Latest block among contributing transactions; on L2 chains an L1 block
    pub block_number: u64,
    /// Lowest confirmation count among contributing transactions
    pub confirmations: u64,
    /// Value observed at the lock so far
    pub filled_amount: u128,
}

/// A redeem observed on chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub secret: Vec<u8>,
    pub tx_hash: String,
}

/// Read-only observer bound to one on-chain identifier
#[async_trait]
pub trait Watcher: Send + Sync {
    fn identifier(&self) -> String;

    async fn initiate_status(&self) -> WatcherResult<InitiateStatus>;

    /// Initiating transaction(s) once the confirmation threshold is met.
    async fn is_initiated(&self) -> WatcherResult<Option<String>> {
        let status = self.initiate_status().await?;
        Ok(status.initiated.then_some(status.tx_hash))
    }

    async fn is_redeemed(&self) -> WatcherResult<Option<Redemption>>;

    async fn is_refunded(&self) -> WatcherResult<Option<String>>;

    async fn expired(&self) -> WatcherResult<bool>;
}

/// Party that locks funds first
#[async_trait]
pub trait InitiatorSwap: Send + Sync {
    async fn initiate(&self) -> WatcherResult<String>;

    /// Block until the counterparty redeems, revealing the secret.
    async fn wait_for_redeem(&self, shutdown: &Shutdown) -> WatcherResult<Redemption>;

    async fn is_redeemed(&self) -> WatcherResult<Option<Redemption>>;

    async fn refund(&self) -> WatcherResult<String>;

    async fn expired(&self) -> WatcherResult<bool>;
}

/// Party that claims funds with the secret
#[async_trait]
pub trait RedeemerSwap: Send + Sync {
    async fn redeem(&self, secret: &[u8]) -> WatcherResult<String>;

    /// Block until the lock is confirmed, returning its transaction(s).
    async fn wait_for_initiate(&self, shutdown: &Shutdown) -> WatcherResult<String>;

    async fn is_initiated(&self) -> WatcherResult<Option<String>>;
}

/// True if `secret` hashes to `secret_hash`
pub fn secret_matches(secret: &[u8], secret_hash: &[u8; 32]) -> bool {
    Sha256::digest(secret).as_slice() == secret_hash
}

/// Reject a secret that does not open this lock
pub(crate) fn check_secret(secret: &[u8], secret_hash: &[u8; 32]) -> WatcherResult<()> {
    if secret_matches(secret, secret_hash) {
        Ok(())
    } else {
        Err(WatcherError::ignorable(SwapperError::Validation(format!(
            "secret does not hash to {}",
            hex::encode(secret_hash)
        ))))
    }
}

/// Builds the watcher for a stored swap
pub trait WatcherFactory: Send + Sync {
    fn watcher(&self, swap: &AtomicSwap) -> WatcherResult<Arc<dyn Watcher>>;
}

/// Factory over the connected chains
pub struct ChainWatcherFactory {
    chains: Arc<ChainManager>,
    configs: HashMap<Chain, ChainConfig>,
    screener: Option<Arc<dyn Screener>>,
}

impl ChainWatcherFactory {
    pub fn new(
        chains: Arc<ChainManager>,
        settings: &Settings,
        screener: Option<Arc<dyn Screener>>,
    ) -> Self {
        let configs = settings
            .enabled_chains()
            .into_iter()
            .map(|(_, c)| (c.chain, c.clone()))
            .collect();
        Self {
            chains,
            configs,
            screener,
        }
    }
}

impl WatcherFactory for ChainWatcherFactory {
    fn watcher(&self, swap: &AtomicSwap) -> WatcherResult<Arc<dyn Watcher>> {
        let config = self
            .configs
            .get(&swap.chain)
            .ok_or_else(|| WatcherError::non_recoverable(SwapperError::ChainNotFound(swap.chain)))?;
        let configured = if swap.minimum_confirmations > 0 {
            swap.minimum_confirmations
        } else {
            config.min_confirmations
        };
        let min_confirmations = effective_minimum(swap.chain, configured);
        let client = self
            .chains
            .get(swap.chain)
            .map_err(WatcherError::non_recoverable)?;

        let watcher: Arc<dyn Watcher> = match (swap.chain.family(), client) {
            (ChainFamily::Utxo, ChainClient::Bitcoin(client)) => Arc::new(
                utxo::UtxoWatcher::from_swap(
                    client,
                    swap,
                    min_confirmations,
                    self.screener.clone(),
                )?,
            ),
            (ChainFamily::Account | ChainFamily::AccountL2, ChainClient::Evm(client)) => {
                Arc::new(account::AccountWatcher::from_swap(
                    client,
                    swap,
                    min_confirmations,
                    account::ScanRange {
                        start_block: config.start_block,
                        max_block_range: config.max_block_range,
                    },
                    self.screener.clone(),
                )?)
            }
            (family, client) => {
                return Err(WatcherError::non_recoverable(SwapperError::Config(format!(
                    "{} is a {:?} chain but its client is for {}",
                    swap.chain,
                    family,
                    client.chain()
                ))))
            }
        };
        Ok(watcher)
    }
}
