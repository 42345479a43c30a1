//! Gas estimation for HTLC contract calls

use crate::chain::{EvmProvider, GasPrice};
use crate::error::SwapperResult;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::U256;
use tracing::debug;

/// Gas estimator for transactions
#[derive(Debug, Clone)]
pub struct GasEstimator {
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    gas_limit_buffer_percent: u64,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
}

impl GasEstimator {
    pub fn new() -> Self {
        Self {
            gas_limit_buffer_percent: 20,
            gas_price_buffer_percent: 10,
        }
    }

    /// Node estimate plus the limit buffer
    pub async fn estimate_gas(
        &self,
        provider: &EvmProvider,
        tx: &TypedTransaction,
    ) -> SwapperResult<U256> {
        let estimate = provider.estimate_gas(tx).await?;
        Ok(self.buffer_limit(estimate))
    }

    pub fn buffer_limit(&self, estimate: U256) -> U256 {
        estimate + estimate * self.gas_limit_buffer_percent / 100
    }

    /// Get optimized gas price for a chain
    pub async fn get_gas_price(&self, provider: &EvmProvider) -> SwapperResult<GasPrice> {
        let gas_price = provider.get_gas_price().await?;
        let buffered = self.buffer_price(&gas_price);
        debug!("Gas price for {}: {:?}", provider.config().chain, buffered);
        Ok(buffered)
    }

    pub fn buffer_price(&self, gas_price: &GasPrice) -> GasPrice {
        match gas_price {
            GasPrice::Legacy(price) => {
                GasPrice::Legacy(*price + *price * self.gas_price_buffer_percent / 100)
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: *max_fee_per_gas
                    + *max_fee_per_gas * self.gas_price_buffer_percent / 100,
                max_priority_fee_per_gas: *max_priority_fee_per_gas
                    + *max_priority_fee_per_gas * self.gas_price_buffer_percent / 100,
            },
        }
    }

    /// Bump a price by `factor` percent to replace an underpriced transaction
    pub fn speed_up_gas_price(&self, current: &GasPrice, factor: u64) -> GasPrice {
        match current {
            GasPrice::Legacy(price) => GasPrice::Legacy(*price * factor / 100),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: *max_fee_per_gas * factor / 100,
                max_priority_fee_per_gas: *max_priority_fee_per_gas * factor / 100,
            },
        }
    }

    /// Worst-case cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> U256 {
        match gas_price {
            GasPrice::Legacy(price) => gas_limit * *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => gas_limit * *max_fee_per_gas,
        }
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_limit_and_price() {
        let estimator = GasEstimator::new();
        assert_eq!(estimator.buffer_limit(U256::from(100_000)), U256::from(120_000));
        assert_eq!(
            estimator.buffer_price(&GasPrice::Legacy(U256::from(100))),
            GasPrice::Legacy(U256::from(110))
        );
    }

    #[test]
    fn speed_up_scales_both_fees() {
        let estimator = GasEstimator::new();
        let bumped = estimator.speed_up_gas_price(
            &GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(400),
                max_priority_fee_per_gas: U256::from(40),
            },
            125,
        );
        assert_eq!(
            bumped,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(500),
                max_priority_fee_per_gas: U256::from(50),
            }
        );
    }

    #[test]
    fn cost_uses_max_fee() {
        let cost = GasEstimator::calculate_cost(
            U256::from(21_000),
            &GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(10),
                max_priority_fee_per_gas: U256::from(1),
            },
        );
        assert_eq!(cost, U256::from(210_000));
    }
}
