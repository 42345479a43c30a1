//! Orders and their two atomic swap legs

use crate::error::{SwapperError, SwapperResult};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chain identifier of a swap leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Bitcoin,
    BitcoinTestnet,
    BitcoinRegtest,
    Ethereum,
    EthereumSepolia,
    EthereumLocalnet,
    Arbitrum,
    ArbitrumSepolia,
    ArbitrumLocalnet,
}

/// Chain families with distinct HTLC constructions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainFamily {
    /// UTXO chains: P2WSH script HTLC
    Utxo,
    /// Account chains: shared HTLC contract
    Account,
    /// Account chains settled on an L1, timelocks counted in L1 blocks
    AccountL2,
}

impl Chain {
    pub const ALL: [Chain; 9] = [
        Chain::Bitcoin,
        Chain::BitcoinTestnet,
        Chain::BitcoinRegtest,
        Chain::Ethereum,
        Chain::EthereumSepolia,
        Chain::EthereumLocalnet,
        Chain::Arbitrum,
        Chain::ArbitrumSepolia,
        Chain::ArbitrumLocalnet,
    ];

    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Bitcoin | Chain::BitcoinTestnet | Chain::BitcoinRegtest => ChainFamily::Utxo,
            Chain::Ethereum | Chain::EthereumSepolia | Chain::EthereumLocalnet => {
                ChainFamily::Account
            }
            Chain::Arbitrum | Chain::ArbitrumSepolia | Chain::ArbitrumLocalnet => {
                ChainFamily::AccountL2
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::BitcoinTestnet => "bitcoin_testnet",
            Chain::BitcoinRegtest => "bitcoin_regtest",
            Chain::Ethereum => "ethereum",
            Chain::EthereumSepolia => "ethereum_sepolia",
            Chain::EthereumLocalnet => "ethereum_localnet",
            Chain::Arbitrum => "arbitrum",
            Chain::ArbitrumSepolia => "arbitrum_sepolia",
            Chain::ArbitrumLocalnet => "arbitrum_localnet",
        }
    }

    /// Bitcoin network parameters for UTXO chains
    pub fn bitcoin_network(&self) -> Option<bitcoin::Network> {
        match self {
            Chain::Bitcoin => Some(bitcoin::Network::Bitcoin),
            Chain::BitcoinTestnet => Some(bitcoin::Network::Testnet),
            Chain::BitcoinRegtest => Some(bitcoin::Network::Regtest),
            _ => None,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = SwapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| SwapperError::Validation(format!("unknown chain '{}'", s)))
    }
}

/// Lifecycle of one swap leg
///
/// `NotStarted -> Detected -> Initiated -> {Redeemed | Expired}` and
/// `Expired -> {Redeemed | Refunded}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    #[default]
    NotStarted,
    Detected,
    Initiated,
    Redeemed,
    Expired,
    Refunded,
}

impl SwapStatus {
    pub const ALL: [SwapStatus; 6] = [
        SwapStatus::NotStarted,
        SwapStatus::Detected,
        SwapStatus::Initiated,
        SwapStatus::Redeemed,
        SwapStatus::Expired,
        SwapStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::NotStarted => "not_started",
            SwapStatus::Detected => "detected",
            SwapStatus::Initiated => "initiated",
            SwapStatus::Redeemed => "redeemed",
            SwapStatus::Expired => "expired",
            SwapStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapStatus::Redeemed | SwapStatus::Refunded)
    }

    /// Status an operator retry moves this leg back to.
    pub fn retry_rewind(&self) -> SwapperResult<SwapStatus> {
        match self {
            SwapStatus::Redeemed => Ok(SwapStatus::Initiated),
            SwapStatus::Refunded => Ok(SwapStatus::Expired),
            other => Err(SwapperError::InvalidStateTransition {
                from: other.to_string(),
                to: "retry".to_string(),
            }),
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwapStatus {
    type Err = SwapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SwapStatus::ALL
            .iter()
            .find(|st| st.as_str() == s)
            .copied()
            .ok_or_else(|| SwapperError::Validation(format!("unknown swap status '{}'", s)))
    }
}

/// Order-level outcome, composed from the two legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Created,
    Filled,
    Executed,
    FailedSoft,
    FailedHard,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Created,
        OrderStatus::Filled,
        OrderStatus::Executed,
        OrderStatus::FailedSoft,
        OrderStatus::FailedHard,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Filled => "filled",
            OrderStatus::Executed => "executed",
            OrderStatus::FailedSoft => "failed_soft",
            OrderStatus::FailedHard => "failed_hard",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Executed
                | OrderStatus::FailedSoft
                | OrderStatus::FailedHard
                | OrderStatus::Cancelled
        )
    }

    /// Status an operator retry moves this order back to.
    pub fn retry_rewind(&self) -> SwapperResult<OrderStatus> {
        match self {
            OrderStatus::FailedSoft | OrderStatus::FailedHard => Ok(OrderStatus::Filled),
            other => Err(SwapperError::InvalidStateTransition {
                from: other.to_string(),
                to: "retry".to_string(),
            }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = SwapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .iter()
            .find(|st| st.as_str() == s)
            .copied()
            .ok_or_else(|| SwapperError::Validation(format!("unknown order status '{}'", s)))
    }
}

/// One leg of an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicSwap {
    pub id: i64,
    pub chain: Chain,
    pub initiator_address: String,
    pub redeemer_address: String,
    /// `primary` for the chain's native asset, otherwise the token address
    pub asset: String,
    /// Smallest on-chain unit, decimal
    pub amount: String,
    /// Block count; relative CSV blocks on UTXO chains, contract timelock on account chains
    pub timelock: String,
    pub secret_hash: String,
    /// P2WSH address (UTXO) or hex order id (account chains)
    pub on_chain_identifier: String,
    /// Comma-joined when the deposit spans several transactions
    pub initiate_tx_hash: String,
    pub redeem_tx_hash: String,
    pub refund_tx_hash: String,
    pub secret: String,
    pub current_confirmations: u64,
    pub minimum_confirmations: u64,
    pub filled_amount: String,
    pub initiate_block_number: u64,
    pub status: SwapStatus,
}

impl AtomicSwap {
    pub fn new(chain: Chain, secret_hash: impl Into<String>) -> Self {
        Self {
            id: 0,
            chain,
            initiator_address: String::new(),
            redeemer_address: String::new(),
            asset: "primary".to_string(),
            amount: "0".to_string(),
            timelock: "0".to_string(),
            secret_hash: secret_hash.into(),
            on_chain_identifier: String::new(),
            initiate_tx_hash: String::new(),
            redeem_tx_hash: String::new(),
            refund_tx_hash: String::new(),
            secret: String::new(),
            current_confirmations: 0,
            minimum_confirmations: 0,
            filled_amount: String::new(),
            initiate_block_number: 0,
            status: SwapStatus::NotStarted,
        }
    }

    pub fn amount(&self) -> SwapperResult<u128> {
        parse_non_negative("amount", &self.amount)
    }

    pub fn timelock(&self) -> SwapperResult<u64> {
        let timelock = parse_non_negative("timelock", &self.timelock)?;
        u64::try_from(timelock)
            .map_err(|_| SwapperError::Validation(format!("timelock {} out of range", timelock)))
    }

    pub fn secret_hash_bytes(&self) -> SwapperResult<[u8; 32]> {
        decode_hash32("secret hash", &self.secret_hash)
    }

    pub fn initiate_tx_hashes(&self) -> Vec<&str> {
        self.initiate_tx_hash
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .collect()
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Rewind one redeem/refund cycle so the leg is observed again.
    pub fn retry_rewind(&mut self) -> SwapperResult<()> {
        let previous = self.status;
        self.status = previous.retry_rewind()?;
        match previous {
            SwapStatus::Redeemed => self.redeem_tx_hash.clear(),
            SwapStatus::Refunded => self.refund_tx_hash.clear(),
            _ => {}
        }
        Ok(())
    }
}

/// A matched maker/taker order with its two legs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub maker: String,
    pub taker: String,
    pub initiator_atomic_swap: AtomicSwap,
    pub follower_atomic_swap: AtomicSwap,
    pub secret_hash: String,
    /// Shared secret, set once either leg reveals it
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub status: OrderStatus,
}

impl Order {
    /// Operator retry: rewind the order and every terminal leg one cycle.
    pub fn retry(&mut self) -> SwapperResult<()> {
        let next = self.status.retry_rewind()?;
        for leg in [
            &mut self.initiator_atomic_swap,
            &mut self.follower_atomic_swap,
        ] {
            if leg.status.is_terminal() {
                leg.retry_rewind()?;
            }
        }
        self.status = next;
        Ok(())
    }
}

/// Parse a decimal, non-negative integer field.
pub fn parse_non_negative(field: &str, value: &str) -> SwapperResult<u128> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SwapperError::Validation(format!(
            "{} '{}' is not a non-negative integer",
            field, value
        )));
    }
    trimmed
        .parse::<u128>()
        .map_err(|e| SwapperError::Validation(format!("{} '{}': {}", field, value, e)))
}

/// Decode a 32-byte hex value, with or without `0x`.
pub fn decode_hash32(field: &str, value: &str) -> SwapperResult<[u8; 32]> {
    let bytes = hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| SwapperError::Validation(format!("{} '{}': {}", field, value, e)))?;
    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
        SwapperError::Validation(format!("{} must be 32 bytes, got {}", field, bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_round_trips_through_its_name() {
        for chain in Chain::ALL {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
        assert!("dogecoin".parse::<Chain>().is_err());
    }

    #[test]
    fn chain_families() {
        assert_eq!(Chain::BitcoinRegtest.family(), ChainFamily::Utxo);
        assert_eq!(Chain::EthereumSepolia.family(), ChainFamily::Account);
        assert_eq!(Chain::Arbitrum.family(), ChainFamily::AccountL2);
        assert_eq!(Chain::Ethereum.bitcoin_network(), None);
    }

    #[test]
    fn amounts_must_be_non_negative_integers() {
        let mut swap = AtomicSwap::new(Chain::Bitcoin, "00".repeat(32));
        swap.amount = "100000".to_string();
        assert_eq!(swap.amount().unwrap(), 100_000);

        for bad in ["-1", "1.5", "", "0x10", "abc"] {
            swap.amount = bad.to_string();
            assert!(swap.amount().is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn secret_hash_must_be_32_bytes() {
        let swap = AtomicSwap::new(Chain::Ethereum, format!("0x{}", "ab".repeat(32)));
        assert_eq!(swap.secret_hash_bytes().unwrap(), [0xab; 32]);

        let short = AtomicSwap::new(Chain::Ethereum, "abcd");
        assert!(short.secret_hash_bytes().is_err());
    }

    #[test]
    fn initiate_hashes_split_on_commas() {
        let mut swap = AtomicSwap::new(Chain::Bitcoin, "");
        swap.initiate_tx_hash = "txHash1,txHash2".to_string();
        assert_eq!(swap.initiate_tx_hashes(), vec!["txHash1", "txHash2"]);
        swap.initiate_tx_hash.clear();
        assert!(swap.initiate_tx_hashes().is_empty());
    }

    #[test]
    fn retry_rewind_table() {
        assert_eq!(SwapStatus::Redeemed.retry_rewind().unwrap(), SwapStatus::Initiated);
        assert_eq!(SwapStatus::Refunded.retry_rewind().unwrap(), SwapStatus::Expired);
        assert!(SwapStatus::Initiated.retry_rewind().is_err());

        assert_eq!(OrderStatus::FailedHard.retry_rewind().unwrap(), OrderStatus::Filled);
        assert_eq!(OrderStatus::FailedSoft.retry_rewind().unwrap(), OrderStatus::Filled);
        assert!(OrderStatus::Executed.retry_rewind().is_err());
        assert!(OrderStatus::Cancelled.retry_rewind().is_err());
    }

    #[test]
    fn order_retry_rewinds_terminal_legs() {
        let mut initiator = AtomicSwap::new(Chain::Bitcoin, "h");
        initiator.status = SwapStatus::Redeemed;
        initiator.redeem_tx_hash = "redeem".to_string();
        let mut follower = AtomicSwap::new(Chain::Ethereum, "h");
        follower.status = SwapStatus::Refunded;
        follower.refund_tx_hash = "refund".to_string();

        let mut order = Order {
            id: 7,
            maker: "maker".to_string(),
            taker: "taker".to_string(),
            initiator_atomic_swap: initiator,
            follower_atomic_swap: follower,
            secret_hash: "h".to_string(),
            secret: "s".to_string(),
            created_at: Utc::now(),
            status: OrderStatus::FailedHard,
        };

        order.retry().unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.initiator_atomic_swap.status, SwapStatus::Initiated);
        assert!(order.initiator_atomic_swap.redeem_tx_hash.is_empty());
        assert_eq!(order.follower_atomic_swap.status, SwapStatus::Expired);
        assert!(order.follower_atomic_swap.refund_tx_hash.is_empty());
        assert_eq!(order.secret, "s");
    }
}
