//! Transaction sender with retry logic and underpriced replacement

use super::gas::GasEstimator;
use crate::chain::{EvmProvider, GasPrice};
use crate::error::{SwapperError, SwapperResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Signs and submits contract calls on account chains
#[derive(Debug, Clone)]
pub struct TransactionSender {
    gas_estimator: GasEstimator,
    max_attempts: u32,
    retry_delay: Duration,
    send_timeout: Duration,
    receipt_timeout: Duration,
    receipt_poll_interval: Duration,
}

impl TransactionSender {
    pub fn new() -> Self {
        Self {
            gas_estimator: GasEstimator::new(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            send_timeout: Duration::from_secs(30),
            receipt_timeout: Duration::from_secs(300),
            receipt_poll_interval: Duration::from_secs(2),
        }
    }

    /// Sign and submit a call to `to` with `calldata`
    pub async fn send_call(
        &self,
        provider: &EvmProvider,
        wallet: &LocalWallet,
        to: Address,
        calldata: Bytes,
    ) -> SwapperResult<H256> {
        let from = wallet.address();
        let chain_id = provider.chain_id();
        let nonce = provider.pending_nonce(from).await?;
        let gas_price = self.gas_estimator.get_gas_price(provider).await?;

        let draft = build_tx(from, to, calldata.clone(), nonce, None, &gas_price, chain_id);
        let gas_limit = self.gas_estimator.estimate_gas(provider, &draft).await?;
        let tx = build_tx(from, to, calldata, nonce, Some(gas_limit), &gas_price, chain_id);

        debug!(
            "Sending call to {:?} on {} (nonce {}, max cost {} wei)",
            to,
            provider.config().chain,
            nonce,
            GasEstimator::calculate_cost(gas_limit, &gas_price)
        );

        self.send_with_retry(provider, wallet, tx, gas_price).await
    }

    /// Send transaction with retry logic
    async fn send_with_retry(
        &self,
        provider: &EvmProvider,
        wallet: &LocalWallet,
        mut tx: TypedTransaction,
        mut gas_price: GasPrice,
    ) -> SwapperResult<H256> {
        let chain = provider.config().chain;
        let wallet = wallet.clone().with_chain_id(provider.chain_id());

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_attempts {
            attempts += 1;

            let signed_tx = match wallet.sign_transaction(&tx).await {
                Ok(sig) => tx.rlp_signed(&sig),
                Err(e) => {
                    error!("Failed to sign transaction: {}", e);
                    return Err(SwapperError::Wallet(e.to_string()));
                }
            };

            let result = timeout(
                self.send_timeout,
                provider.http().send_raw_transaction(signed_tx),
            )
            .await;

            match result {
                Ok(Ok(pending_tx)) => {
                    let tx_hash = pending_tx.tx_hash();
                    info!(
                        "Transaction sent on {}: {:?} (attempt {}/{})",
                        chain, tx_hash, attempts, self.max_attempts
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let error_msg = e.to_string();

                    if error_msg.contains("nonce too low") {
                        warn!("Nonce too low on {}, resyncing", chain);
                        let nonce = provider.pending_nonce(wallet.address()).await?;
                        tx.set_nonce(nonce);
                    } else if error_msg.contains("underpriced") {
                        warn!("Transaction underpriced on {}, increasing gas", chain);
                        gas_price = self.gas_estimator.speed_up_gas_price(&gas_price, 125);
                        tx = rebuild_tx_with_gas(&tx, &gas_price);
                    } else if error_msg.contains("insufficient funds") {
                        return Err(SwapperError::InsufficientBalance {
                            chain,
                            have: "unknown".to_string(),
                            need: "unknown".to_string(),
                        });
                    } else if error_msg.contains("execution reverted") {
                        return Err(SwapperError::Transaction(error_msg));
                    }

                    last_error = Some(SwapperError::Transaction(error_msg));
                }
                Err(_) => {
                    warn!("Transaction send timeout on {} (attempt {})", chain, attempts);
                    last_error = Some(SwapperError::Timeout {
                        operation: "send transaction".to_string(),
                    });
                }
            }

            if attempts < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| SwapperError::Transaction("Unknown error".to_string())))
    }

    /// Poll until `tx_hash` is mined; a reverted receipt is an error
    pub async fn wait_for_receipt(
        &self,
        provider: &EvmProvider,
        tx_hash: H256,
    ) -> SwapperResult<TransactionReceipt> {
        let deadline = tokio::time::Instant::now() + self.receipt_timeout;
        loop {
            if let Some(receipt) = provider.get_transaction_receipt(tx_hash).await? {
                if receipt.status == Some(U64::from(1)) {
                    return Ok(receipt);
                }
                return Err(SwapperError::Transaction(format!(
                    "transaction {:?} reverted",
                    tx_hash
                )));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SwapperError::Timeout {
                    operation: format!("receipt for {:?}", tx_hash),
                });
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

impl Default for TransactionSender {
    fn default() -> Self {
        Self::new()
    }
}

fn build_tx(
    from: Address,
    to: Address,
    data: Bytes,
    nonce: U256,
    gas: Option<U256>,
    gas_price: &GasPrice,
    chain_id: u64,
) -> TypedTransaction {
    let mut tx: TypedTransaction = match gas_price {
        GasPrice::Legacy(price) => TransactionRequest::new()
            .from(from)
            .to(to)
            .data(data)
            .nonce(nonce)
            .gas_price(*price)
            .into(),
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => Eip1559TransactionRequest::new()
            .from(from)
            .to(to)
            .data(data)
            .nonce(nonce)
            .max_fee_per_gas(*max_fee_per_gas)
            .max_priority_fee_per_gas(*max_priority_fee_per_gas)
            .into(),
    };
    if let Some(gas) = gas {
        tx.set_gas(gas);
    }
    tx.set_chain_id(chain_id);
    tx
}

/// Rebuild transaction with new gas price
fn rebuild_tx_with_gas(tx: &TypedTransaction, gas_price: &GasPrice) -> TypedTransaction {
    let to = match tx.to() {
        Some(NameOrAddress::Address(addr)) => *addr,
        _ => Address::zero(),
    };
    build_tx(
        tx.from().copied().unwrap_or_default(),
        to,
        tx.data().cloned().unwrap_or_default(),
        tx.nonce().copied().unwrap_or_default(),
        tx.gas().copied(),
        gas_price,
        tx.chain_id().map(|id| id.as_u64()).unwrap_or_default(),
    )
}
