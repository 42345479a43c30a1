//! Chain client capabilities consumed by the swap protocol
//!
//! One trait per chain family. Concrete clients live in [`super::esplora`]
//! and [`super::evm`]; tests substitute mocks.

use crate::error::SwapperResult;
use crate::model::Chain;

use async_trait::async_trait;
use bitcoin::{Address as BtcAddress, PrivateKey, ScriptBuf};
use ethers::signers::LocalWallet;
use ethers::types::{Address, Log, H256, U256};

/// Unspent output sitting at an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    /// `None` while in the mempool
    pub block_height: Option<u64>,
}

/// Input of a transaction touching a watched address
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxInput {
    pub prev_txid: String,
    pub prev_vout: u32,
    pub prev_address: Option<String>,
    pub witness: Vec<Vec<u8>>,
}

/// Output of a transaction touching a watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Option<String>,
    pub value: u64,
}

/// Transaction from an address's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTx {
    pub txid: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub block_height: Option<u64>,
}

impl AddressTx {
    /// True if any input spends an output previously locked to `address`.
    pub fn spends_from(&self, address: &str) -> bool {
        self.inputs
            .iter()
            .any(|input| input.prev_address.as_deref() == Some(address))
    }

    /// True if any output pays `address`.
    pub fn pays_to(&self, address: &str) -> bool {
        self.outputs
            .iter()
            .any(|output| output.address.as_deref() == Some(address))
    }
}

/// UTXO-family chain client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BitcoinClient: Send + Sync {
    fn chain(&self) -> Chain;

    async fn get_tip_height(&self) -> SwapperResult<u64>;

    /// Block height and confirmation count of a transaction; `(0, 0)` while unconfirmed.
    async fn get_confirmations(&self, txid: &str) -> SwapperResult<(u64, u64)>;

    /// Unspent outputs at `address` and their total value.
    async fn get_utxos(&self, address: &BtcAddress) -> SwapperResult<(Vec<Utxo>, u64)>;

    /// Transactions funding or spending from `address`.
    async fn get_address_txs(&self, address: &BtcAddress) -> SwapperResult<Vec<AddressTx>>;

    /// Pay `amount` satoshis to `to` from the key's P2WPKH wallet.
    async fn send(&self, to: &BtcAddress, amount: u64, key: &PrivateKey) -> SwapperResult<String>;

    /// Sweep every output locked by the P2WSH `script` to the key's wallet.
    ///
    /// `witness` is a template: elements equal to
    /// [`crate::swap::utxo::SIGNATURE_PLACEHOLDER`] are replaced by the
    /// input signature. `wait_blocks` becomes each input's relative lock.
    async fn spend(
        &self,
        script: &ScriptBuf,
        witness: Vec<Vec<u8>>,
        key: &PrivateKey,
        wait_blocks: u16,
    ) -> SwapperResult<String>;
}

/// HTLC contract record for one order id
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OnChainOrder {
    pub initiator: Address,
    pub redeemer: Address,
    pub initiated_at: U256,
    pub timelock: U256,
    pub amount: U256,
    pub is_fulfilled: bool,
}

/// Account-family chain client bound to one HTLC contract
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvmClient: Send + Sync {
    fn chain(&self) -> Chain;

    fn contract_address(&self) -> Address;

    async fn get_current_block(&self) -> SwapperResult<u64>;

    /// Block number and confirmation count of a transaction; `(0, 0)` while pending.
    async fn get_confirmations(&self, tx_hash: H256) -> SwapperResult<(u64, u64)>;

    /// HTLC contract logs in `[from_block, to_block]` matching `topics` positionally.
    async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        topics: Vec<H256>,
    ) -> SwapperResult<Vec<Log>>;

    async fn get_order(&self, order_id: H256) -> SwapperResult<OnChainOrder>;

    /// L1 block number a block of this chain was sequenced against.
    /// Identity on L1 chains.
    async fn l1_block_number(&self, block: u64) -> SwapperResult<u64>;

    /// Lock `amount` for `redeemer`, approving the token first if needed.
    async fn initiate(
        &self,
        wallet: &LocalWallet,
        redeemer: Address,
        timelock: U256,
        amount: U256,
        secret_hash: [u8; 32],
    ) -> SwapperResult<H256>;

    async fn redeem(
        &self,
        wallet: &LocalWallet,
        order_id: H256,
        secret: Vec<u8>,
    ) -> SwapperResult<H256>;

    async fn refund(&self, wallet: &LocalWallet, order_id: H256) -> SwapperResult<H256>;
}
