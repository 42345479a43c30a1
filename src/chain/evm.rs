//! Account-chain provider with multi-RPC failover, bound to the HTLC contract

use super::confirmations::confirmations_at;
use super::client::{EvmClient, OnChainOrder};
use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{SwapperError, SwapperResult};
use crate::model::{Chain, ChainFamily};
use crate::tx::TransactionSender;

use async_trait::async_trait;
use ethers::contract::{abigen, ContractError};
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

abigen!(
    HtlcContract,
    r#"[
        function initiate(address redeemer, uint256 timelock, uint256 amount, bytes32 secretHash) external
        function redeem(bytes32 orderID, bytes secret) external
        function refund(bytes32 orderID) external
        function orders(bytes32 orderID) external view returns (address, address, uint256, uint256, uint256, bool)
        function token() external view returns (address)
    ]"#
);

abigen!(
    Erc20Token,
    r#"[
        function allowance(address owner, address spender) external view returns (uint256)
        function approve(address spender, uint256 amount) external returns (bool)
    ]"#
);

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

/// Multi-provider wrapper with automatic failover
pub struct EvmProvider {
    config: ChainConfig,
    chain_id: u64,
    contract: Address,
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
    sender: TransactionSender,
}

impl EvmProvider {
    /// Create a new provider and resolve the network's chain id
    pub async fn new(config: ChainConfig) -> SwapperResult<Self> {
        let contract: Address = config
            .contract_address
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|e| SwapperError::Config(format!("Invalid contract address: {}", e)))?;

        let mut http_providers = Vec::new();
        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    http_providers.push(provider.interval(Duration::from_millis(100)));
                    debug!("Added HTTP provider for chain {}: {}", config.chain, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(SwapperError::rpc(config.chain, "No valid RPC providers"));
        }

        let mut provider = Self {
            chain_id: 0,
            contract,
            http_providers,
            current_provider: AtomicUsize::new(0),
            sender: TransactionSender::new(),
            config,
        };
        provider.chain_id = provider.fetch_chain_id().await?;
        info!(
            "Connected to {} (chain id {}), HTLC at {:?}",
            provider.config.chain, provider.chain_id, provider.contract
        );

        Ok(provider)
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain, next);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    fn htlc(&self) -> HtlcContract<Provider<Http>> {
        HtlcContract::new(self.contract, Arc::new(self.http().clone()))
    }

    async fn fetch_chain_id(&self) -> SwapperResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_chainid().await {
                Ok(id) => return Ok(id.as_u64()),
                Err(e) => {
                    warn!("Failed to get chain id from {}: {}", self.config.chain, e);
                    self.failover();
                }
            }
        }
        Err(SwapperError::rpc(self.config.chain, "All providers failed"))
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> SwapperResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain, e
                    );
                    self.failover();
                }
            }
        }

        Err(SwapperError::rpc(self.config.chain, "All providers failed"))
    }

    /// Get transaction receipt
    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> SwapperResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| SwapperError::rpc(self.config.chain, e))
    }

    /// Next nonce including pending transactions
    pub async fn pending_nonce(&self, address: Address) -> SwapperResult<U256> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| SwapperError::rpc(self.config.chain, e))
    }

    /// Estimate gas for a transaction
    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> SwapperResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| SwapperError::GasEstimation(e.to_string()))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> SwapperResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy | GasPriceStrategy::Arbitrum => {
                // Arbitrum prices L1 data into the L2 gas price
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| SwapperError::GasEstimation(e.to_string()))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self) -> SwapperResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| SwapperError::GasEstimation(e.to_string()))?
            .ok_or_else(|| SwapperError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| SwapperError::GasEstimation("No base fee in block".to_string()))?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei

        // Max fee = 2 * base_fee + priority_fee
        let max_fee = base_fee * 2 + priority_fee;

        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        Ok((std::cmp::min(max_fee, max_gwei), priority_fee))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain, e);
                false
            }
        }
    }

    /// ERC20 token locked by the HTLC; zero for the native asset
    async fn token(&self) -> SwapperResult<Address> {
        self.htlc()
            .token()
            .call()
            .await
            .map_err(|e| contract_error(self.config.chain, e))
    }

    /// Approve the HTLC to pull `amount` of its token if the allowance is short
    async fn ensure_allowance(&self, wallet: &LocalWallet, amount: U256) -> SwapperResult<()> {
        let token = self.token().await?;
        if token.is_zero() {
            return Ok(());
        }

        let erc20 = Erc20Token::new(token, Arc::new(self.http().clone()));
        let allowance = erc20
            .allowance(wallet.address(), self.contract)
            .call()
            .await
            .map_err(|e| contract_error(self.config.chain, e))?;
        if allowance >= amount {
            return Ok(());
        }

        info!(
            "Approving HTLC {:?} for {} of token {:?} on {}",
            self.contract, amount, token, self.config.chain
        );
        let calldata = erc20
            .approve(self.contract, U256::MAX)
            .calldata()
            .ok_or_else(|| SwapperError::Contract("approve calldata".to_string()))?;
        let tx_hash = self.sender.send_call(self, wallet, token, calldata).await?;
        self.sender.wait_for_receipt(self, tx_hash).await?;
        Ok(())
    }

    async fn call_htlc(
        &self,
        wallet: &LocalWallet,
        calldata: Option<Bytes>,
        what: &str,
    ) -> SwapperResult<H256> {
        let calldata =
            calldata.ok_or_else(|| SwapperError::Contract(format!("{} calldata", what)))?;
        let tx_hash = self
            .sender
            .send_call(self, wallet, self.contract, calldata)
            .await?;
        self.sender.wait_for_receipt(self, tx_hash).await?;
        info!("{} confirmed on {}: {:?}", what, self.config.chain, tx_hash);
        Ok(tx_hash)
    }
}

/// Classify a contract call failure: decoding problems mean the deployed
/// contract is not the HTLC we expect.
fn contract_error<M: Middleware>(chain: Chain, err: ContractError<M>) -> SwapperError {
    match err {
        ContractError::DecodingError(e) => SwapperError::Contract(e.to_string()),
        ContractError::AbiError(e) => SwapperError::Contract(e.to_string()),
        ContractError::DetokenizationError(e) => SwapperError::Contract(e.to_string()),
        ContractError::ContractNotDeployed => {
            SwapperError::Contract("HTLC contract not deployed".to_string())
        }
        other => SwapperError::rpc(chain, other),
    }
}

#[async_trait]
impl EvmClient for EvmProvider {
    fn chain(&self) -> Chain {
        self.config.chain
    }

    fn contract_address(&self) -> Address {
        self.contract
    }

    async fn get_current_block(&self) -> SwapperResult<u64> {
        self.get_block_number().await
    }

    async fn get_confirmations(&self, tx_hash: H256) -> SwapperResult<(u64, u64)> {
        let receipt = match self.get_transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok((0, 0)),
        };
        let block = match receipt.block_number {
            Some(block) => block.as_u64(),
            None => return Ok((0, 0)),
        };
        let current = self.get_block_number().await?;
        Ok((block, confirmations_at(current, block)))
    }

    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        topics: Vec<H256>,
    ) -> SwapperResult<Vec<Log>> {
        let mut filter = Filter::new()
            .address(self.contract)
            .from_block(from_block)
            .to_block(to_block);
        for (position, topic) in topics.into_iter().enumerate() {
            filter = match position {
                0 => filter.topic0(topic),
                1 => filter.topic1(topic),
                2 => filter.topic2(topic),
                _ => filter.topic3(topic),
            };
        }

        for _ in 0..self.http_providers.len() {
            match self.http().get_logs(&filter).await {
                Ok(logs) => return Ok(logs),
                Err(e) => {
                    warn!("Failed to get logs from chain {}: {}", self.config.chain, e);
                    self.failover();
                }
            }
        }

        Err(SwapperError::rpc(
            self.config.chain,
            "All providers failed to get logs",
        ))
    }

    async fn get_order(&self, order_id: H256) -> SwapperResult<OnChainOrder> {
        let (initiator, redeemer, initiated_at, timelock, amount, is_fulfilled) = self
            .htlc()
            .orders(order_id.0)
            .call()
            .await
            .map_err(|e| contract_error(self.config.chain, e))?;
        Ok(OnChainOrder {
            initiator,
            redeemer,
            initiated_at,
            timelock,
            amount,
            is_fulfilled,
        })
    }

    async fn l1_block_number(&self, block: u64) -> SwapperResult<u64> {
        if self.config.chain.family() != ChainFamily::AccountL2 {
            return Ok(block);
        }

        let header = self
            .http()
            .get_block(block)
            .await
            .map_err(|e| SwapperError::rpc(self.config.chain, e))?
            .ok_or_else(|| {
                SwapperError::rpc(self.config.chain, format!("block {} not found", block))
            })?;

        match header.other.get_deserialized::<U64>("l1BlockNumber") {
            Some(Ok(l1)) => Ok(l1.as_u64()),
            Some(Err(e)) => Err(SwapperError::rpc(
                self.config.chain,
                format!("l1BlockNumber of block {}: {}", block, e),
            )),
            None => Err(SwapperError::Contract(format!(
                "block {} on {} carries no l1BlockNumber",
                block, self.config.chain
            ))),
        }
    }

    async fn initiate(
        &self,
        wallet: &LocalWallet,
        redeemer: Address,
        timelock: U256,
        amount: U256,
        secret_hash: [u8; 32],
    ) -> SwapperResult<H256> {
        self.ensure_allowance(wallet, amount).await?;
        let calldata = self
            .htlc()
            .initiate(redeemer, timelock, amount, secret_hash)
            .calldata();
        self.call_htlc(wallet, calldata, "initiate").await
    }

    async fn redeem(
        &self,
        wallet: &LocalWallet,
        order_id: H256,
        secret: Vec<u8>,
    ) -> SwapperResult<H256> {
        let calldata = self
            .htlc()
            .redeem(order_id.0, Bytes::from(secret))
            .calldata();
        self.call_htlc(wallet, calldata, "redeem").await
    }

    async fn refund(&self, wallet: &LocalWallet, order_id: H256) -> SwapperResult<H256> {
        let calldata = self.htlc().refund(order_id.0).calldata();
        self.call_htlc(wallet, calldata, "refund").await
    }
}
