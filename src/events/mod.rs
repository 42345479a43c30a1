//! HTLC contract event types and parsing
//!
//! The shared HTLC contract emits one event per lifecycle step, each indexed
//! by the order id:
//!
//! ```text
//! event Initiated(bytes32 indexed orderID, bytes32 indexed secretHash, uint256 amount);
//! event Redeemed(bytes32 indexed orderID, bytes32 indexed secretHash, bytes secret);
//! event Refunded(bytes32 indexed orderID);
//! ```

use crate::error::{SwapperError, SwapperResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Log, H256, U256};
use serde::Serialize;
use sha3::{Digest, Keccak256};

/// Events emitted by the HTLC contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HtlcEvent {
    Initiated {
        order_id: H256,
        secret_hash: H256,
        amount: U256,
        block_number: u64,
        tx_hash: H256,
    },

    Redeemed {
        order_id: H256,
        secret_hash: H256,
        secret: Vec<u8>,
        block_number: u64,
        tx_hash: H256,
    },

    Refunded {
        order_id: H256,
        block_number: u64,
        tx_hash: H256,
    },
}

impl HtlcEvent {
    /// Get event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            HtlcEvent::Initiated { .. } => "initiated",
            HtlcEvent::Redeemed { .. } => "redeemed",
            HtlcEvent::Refunded { .. } => "refunded",
        }
    }

    pub fn order_id(&self) -> H256 {
        match self {
            HtlcEvent::Initiated { order_id, .. }
            | HtlcEvent::Redeemed { order_id, .. }
            | HtlcEvent::Refunded { order_id, .. } => *order_id,
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            HtlcEvent::Initiated { block_number, .. }
            | HtlcEvent::Redeemed { block_number, .. }
            | HtlcEvent::Refunded { block_number, .. } => *block_number,
        }
    }

    pub fn tx_hash(&self) -> H256 {
        match self {
            HtlcEvent::Initiated { tx_hash, .. }
            | HtlcEvent::Redeemed { tx_hash, .. }
            | HtlcEvent::Refunded { tx_hash, .. } => *tx_hash,
        }
    }
}

/// keccak256 of an event signature
pub fn event_topic(signature: &str) -> H256 {
    H256::from_slice(&Keccak256::digest(signature.as_bytes()))
}

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use super::event_topic;
    use ethers::types::H256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref INITIATED: H256 = event_topic("Initiated(bytes32,bytes32,uint256)");
        pub static ref REDEEMED: H256 = event_topic("Redeemed(bytes32,bytes32,bytes)");
        pub static ref REFUNDED: H256 = event_topic("Refunded(bytes32)");
    }
}

/// Parse a log entry into an [`HtlcEvent`]
///
/// An unknown topic is an [`SwapperError::EventParsing`] error. A known
/// topic whose layout does not match the ABI is a
/// [`SwapperError::Contract`] error: the contract is not the one we expect.
pub fn parse_log(log: &Log) -> SwapperResult<HtlcEvent> {
    let block_number = log
        .block_number
        .map(|b| b.as_u64())
        .ok_or_else(|| SwapperError::EventParsing("log has no block number".to_string()))?;
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| SwapperError::EventParsing("log has no transaction hash".to_string()))?;

    let topic = log
        .topics
        .first()
        .copied()
        .ok_or_else(|| SwapperError::EventParsing("anonymous log".to_string()))?;

    if topic == *topics::INITIATED {
        let order_id = indexed(log, 1, "Initiated")?;
        let secret_hash = indexed(log, 2, "Initiated")?;
        if log.data.len() != 32 {
            return Err(SwapperError::Contract(format!(
                "Initiated data is {} bytes, expected 32",
                log.data.len()
            )));
        }
        Ok(HtlcEvent::Initiated {
            order_id,
            secret_hash,
            amount: U256::from_big_endian(&log.data[..32]),
            block_number,
            tx_hash,
        })
    } else if topic == *topics::REDEEMED {
        let order_id = indexed(log, 1, "Redeemed")?;
        let secret_hash = indexed(log, 2, "Redeemed")?;
        let secret = match abi::decode(&[ParamType::Bytes], &log.data)
            .map_err(|e| SwapperError::Contract(format!("Redeemed data: {}", e)))?
            .pop()
        {
            Some(Token::Bytes(secret)) => secret,
            other => {
                return Err(SwapperError::Contract(format!(
                    "Redeemed data decoded to {:?}",
                    other
                )))
            }
        };
        Ok(HtlcEvent::Redeemed {
            order_id,
            secret_hash,
            secret,
            block_number,
            tx_hash,
        })
    } else if topic == *topics::REFUNDED {
        Ok(HtlcEvent::Refunded {
            order_id: indexed(log, 1, "Refunded")?,
            block_number,
            tx_hash,
        })
    } else {
        Err(SwapperError::EventParsing(format!(
            "unknown event topic {:?}",
            topic
        )))
    }
}

fn indexed(log: &Log, position: usize, event: &str) -> SwapperResult<H256> {
    log.topics.get(position).copied().ok_or_else(|| {
        SwapperError::Contract(format!("{} log is missing indexed topic {}", event, position))
    })
}
