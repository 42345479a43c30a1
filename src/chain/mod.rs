//! Chain module - connections to every configured chain
//!
//! This module provides:
//! - Capability traits the swap protocol is written against
//! - Esplora client for UTXO chains
//! - Multi-RPC provider with failover for account chains
//! - Per-chain confirmation policy

pub mod client;
pub mod confirmations;
pub mod esplora;
pub mod evm;

pub use client::{AddressTx, BitcoinClient, EvmClient, OnChainOrder, TxInput, TxOutput, Utxo};
pub use esplora::EsploraClient;
pub use evm::{EvmProvider, GasPrice};

use crate::config::Settings;
use crate::error::{SwapperError, SwapperResult};
use crate::model::{Chain, ChainFamily};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{error, info};

/// Client for one chain, by family
#[derive(Clone)]
pub enum ChainClient {
    Bitcoin(Arc<dyn BitcoinClient>),
    Evm(Arc<dyn EvmClient>),
}

impl ChainClient {
    pub fn chain(&self) -> Chain {
        match self {
            ChainClient::Bitcoin(client) => client.chain(),
            ChainClient::Evm(client) => client.chain(),
        }
    }

    /// Tip height, used as the liveness probe
    pub async fn tip(&self) -> SwapperResult<u64> {
        match self {
            ChainClient::Bitcoin(client) => client.get_tip_height().await,
            ChainClient::Evm(client) => client.get_current_block().await,
        }
    }
}

/// Manages connections to all configured chains
pub struct ChainManager {
    clients: DashMap<Chain, ChainClient>,
}

impl ChainManager {
    /// Connect every enabled chain
    pub async fn new(settings: &Settings) -> SwapperResult<Self> {
        let manager = Self::empty();

        for (name, chain_config) in settings.enabled_chains() {
            info!("Initializing chain {} ({})", name, chain_config.chain);

            let client = match chain_config.chain.family() {
                ChainFamily::Utxo => {
                    ChainClient::Bitcoin(Arc::new(EsploraClient::new(chain_config)?))
                }
                ChainFamily::Account | ChainFamily::AccountL2 => {
                    ChainClient::Evm(Arc::new(EvmProvider::new(chain_config.clone()).await?))
                }
            };
            manager.insert(client);

            info!("Chain {} initialized successfully", name);
        }

        Ok(manager)
    }

    pub fn empty() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    pub fn insert(&self, client: ChainClient) {
        self.clients.insert(client.chain(), client);
    }

    /// Get client for a specific chain
    pub fn get(&self, chain: Chain) -> SwapperResult<ChainClient> {
        self.clients
            .get(&chain)
            .map(|c| c.clone())
            .ok_or(SwapperError::ChainNotFound(chain))
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(Chain, bool)> {
        let clients: Vec<ChainClient> = self.clients.iter().map(|e| e.value().clone()).collect();
        let mut results = Vec::new();

        for client in clients {
            let chain = client.chain();
            let healthy = match client.tip().await {
                Ok(_) => true,
                Err(e) => {
                    error!("Health check failed for chain {}: {}", chain, e);
                    false
                }
            };
            crate::metrics::record_chain_health(chain, healthy);
            results.push((chain, healthy));
        }

        results
    }

    /// Get all connected chains
    pub fn connected_chains(&self) -> Vec<Chain> {
        self.clients.iter().map(|e| *e.key()).collect()
    }
}
