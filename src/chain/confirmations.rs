//! Confirmation-depth policy per chain
//!
//! Different chains reorganize differently:
//! - Bitcoin: probabilistic, a handful of blocks is customary
//! - Ethereum: probabilistic until the finalized checkpoint
//! - Arbitrum: sequencer soft finality, counted in L2 blocks

use crate::model::Chain;

/// Get recommended confirmation blocks for a chain
pub fn recommended_confirmations(chain: Chain) -> u64 {
    match chain {
        Chain::Bitcoin => 3,
        Chain::BitcoinTestnet => 1,
        Chain::Ethereum => 32,
        Chain::EthereumSepolia => 12,
        Chain::Arbitrum => 64,
        Chain::ArbitrumSepolia => 32,
        // Local dev chains
        Chain::BitcoinRegtest | Chain::EthereumLocalnet | Chain::ArbitrumLocalnet => 1,
    }
}

/// Minimum confirmations for a swap, falling back to the chain default.
pub fn effective_minimum(chain: Chain, configured: u64) -> u64 {
    if configured == 0 {
        recommended_confirmations(chain)
    } else {
        configured
    }
}

/// Confirmations of a transaction mined at `height` with the chain at `tip`.
///
/// Counts blocks built on top of the inclusion block, so a transaction in
/// the tip block has zero. Unmined transactions (height 0) have none.
pub fn confirmations_at(tip: u64, height: u64) -> u64 {
    if height == 0 {
        return 0;
    }
    tip.saturating_sub(height)
}

/// Observed confirmations never exceed the required minimum once stored.
pub fn clamp_confirmations(observed: u64, minimum: u64) -> u64 {
    observed.min(minimum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_to_minimum() {
        assert_eq!(clamp_confirmations(12, 3), 3);
        assert_eq!(clamp_confirmations(2, 3), 2);
        assert_eq!(clamp_confirmations(0, 3), 0);
    }

    #[test]
    fn counts_blocks_above_inclusion() {
        assert_eq!(confirmations_at(103, 100), 3);
        assert_eq!(confirmations_at(103, 102), 1);
        assert_eq!(confirmations_at(104, 102), 2);
        assert_eq!(confirmations_at(102, 102), 0);
        assert_eq!(confirmations_at(100, 102), 0);
        assert_eq!(confirmations_at(103, 0), 0);
    }

    #[test]
    fn zero_minimum_uses_chain_default() {
        assert_eq!(effective_minimum(Chain::Ethereum, 0), 32);
        assert_eq!(effective_minimum(Chain::Ethereum, 5), 5);
        assert_eq!(effective_minimum(Chain::BitcoinRegtest, 0), 1);
    }
}
