//! UTXO-family HTLC: P2WSH script lock
//!
//! ```text
//! OP_IF
//!     OP_SHA256 <secret_hash> OP_EQUALVERIFY OP_DUP OP_HASH160 <redeemer_pkh>
//! OP_ELSE
//!     <wait_blocks> OP_CSV OP_DROP OP_DUP OP_HASH160 <initiator_pkh>
//! OP_ENDIF
//! OP_EQUALVERIFY OP_CHECKSIG
//! ```

use super::wait::{poll_until, Backoff};
use super::{
    check_secret, secret_matches, InitiateStatus, InitiatorSwap, RedeemerSwap, Redemption, Watcher,
};
use crate::chain::BitcoinClient;
use crate::error::{SwapperError, WatcherError, WatcherResult};
use crate::model::{AtomicSwap, Chain};
use crate::screener::Screener;
use crate::shutdown::Shutdown;

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::{
    OP_CHECKSIG, OP_CSV, OP_DROP, OP_DUP, OP_ELSE, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF,
    OP_SHA256,
};
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{
    script, Address as BtcAddress, Network, PrivateKey, PublicKey, ScriptBuf, WitnessVersion,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Witness element the chain client replaces with the input signature
pub const SIGNATURE_PLACEHOLDER: &[u8] = b"add_signature_segwit_v0";

/// Parse an address and require it to belong to `chain`
pub fn parse_address(chain: Chain, address: &str) -> Result<BtcAddress, SwapperError> {
    let network = chain
        .bitcoin_network()
        .ok_or_else(|| SwapperError::Validation(format!("{} is not a UTXO chain", chain)))?;
    BtcAddress::from_str(address)
        .map_err(|e| SwapperError::Validation(format!("address '{}': {}", address, e)))?
        .require_network(network)
        .map_err(|e| SwapperError::Validation(format!("address '{}': {}", address, e)))
}

/// HASH160 of the key behind a P2PKH or P2WPKH address
pub fn pubkey_hash(address: &BtcAddress) -> Result<[u8; 20], SwapperError> {
    if let Some(pkh) = address.pubkey_hash() {
        return Ok(pkh.to_byte_array());
    }
    if let Some(program) = address.witness_program() {
        if program.version() == WitnessVersion::V0 && program.program().len() == 20 {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(program.program().as_bytes());
            return Ok(hash);
        }
    }
    Err(SwapperError::Validation(format!(
        "{} is not a P2PKH or P2WPKH address",
        address
    )))
}

pub fn htlc_script(
    secret_hash: &[u8; 32],
    redeemer_pkh: &[u8; 20],
    initiator_pkh: &[u8; 20],
    wait_blocks: u16,
) -> ScriptBuf {
    script::Builder::new()
        .push_opcode(OP_IF)
        .push_opcode(OP_SHA256)
        .push_slice(secret_hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(redeemer_pkh)
        .push_opcode(OP_ELSE)
        .push_int(i64::from(wait_blocks))
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(initiator_pkh)
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// Lock parameters of one UTXO leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoHtlc {
    pub chain: Chain,
    pub script: ScriptBuf,
    pub address: BtcAddress,
    pub secret_hash: [u8; 32],
    pub initiator_pkh: [u8; 20],
    pub redeemer_pkh: [u8; 20],
    pub wait_blocks: u16,
    pub amount: u64,
}

impl UtxoHtlc {
    pub fn new(
        chain: Chain,
        initiator: &BtcAddress,
        redeemer: &BtcAddress,
        secret_hash: [u8; 32],
        wait_blocks: u16,
        amount: u64,
    ) -> Result<Self, SwapperError> {
        let network: Network = chain
            .bitcoin_network()
            .ok_or_else(|| SwapperError::Validation(format!("{} is not a UTXO chain", chain)))?;
        let initiator_pkh = pubkey_hash(initiator)?;
        let redeemer_pkh = pubkey_hash(redeemer)?;
        let script = htlc_script(&secret_hash, &redeemer_pkh, &initiator_pkh, wait_blocks);
        let address = BtcAddress::p2wsh(&script, network);

        Ok(Self {
            chain,
            script,
            address,
            secret_hash,
            initiator_pkh,
            redeemer_pkh,
            wait_blocks,
            amount,
        })
    }

    /// Lock described by a stored leg; malformed fields are ignorable
    pub fn from_swap(swap: &AtomicSwap) -> WatcherResult<Self> {
        let build = || -> Result<Self, SwapperError> {
            let initiator = parse_address(swap.chain, &swap.initiator_address)?;
            let redeemer = parse_address(swap.chain, &swap.redeemer_address)?;
            let wait_blocks = u16::try_from(swap.timelock()?).map_err(|_| {
                SwapperError::Validation(format!(
                    "timelock {} exceeds a relative lock",
                    swap.timelock
                ))
            })?;
            let amount = u64::try_from(swap.amount()?).map_err(|_| {
                SwapperError::Validation(format!("amount {} exceeds u64", swap.amount))
            })?;
            Self::new(
                swap.chain,
                &initiator,
                &redeemer,
                swap.secret_hash_bytes()?,
                wait_blocks,
                amount,
            )
        };
        let htlc = build().map_err(WatcherError::ignorable)?;

        if !swap.on_chain_identifier.is_empty()
            && swap.on_chain_identifier != htlc.address.to_string()
        {
            return Err(WatcherError::ignorable(SwapperError::CounterpartyMismatch {
                identifier: swap.on_chain_identifier.clone(),
                message: format!("terms derive HTLC address {}", htlc.address),
            }));
        }
        Ok(htlc)
    }

    pub fn redeem_witness(&self, pubkey: &PublicKey, secret: &[u8]) -> Vec<Vec<u8>> {
        vec![
            SIGNATURE_PLACEHOLDER.to_vec(),
            pubkey.to_bytes(),
            secret.to_vec(),
            vec![0x01],
            self.script.to_bytes(),
        ]
    }

    /// The empty element selects the OP_ELSE branch
    pub fn refund_witness(&self, pubkey: &PublicKey) -> Vec<Vec<u8>> {
        vec![
            SIGNATURE_PLACEHOLDER.to_vec(),
            pubkey.to_bytes(),
            Vec::new(),
            self.script.to_bytes(),
        ]
    }
}

/// First accepted deposit
#[derive(Debug, Clone)]
struct Deposit {
    txids: Vec<String>,
    amount: u64,
}

/// Observes one P2WSH HTLC address
pub struct UtxoWatcher {
    client: Arc<dyn BitcoinClient>,
    htlc: UtxoHtlc,
    min_confirmations: u64,
    screener: Option<Arc<dyn Screener>>,
    deposit: RwLock<Option<Deposit>>,
}

impl UtxoWatcher {
    pub fn new(
        client: Arc<dyn BitcoinClient>,
        htlc: UtxoHtlc,
        min_confirmations: u64,
        screener: Option<Arc<dyn Screener>>,
    ) -> Self {
        Self {
            client,
            htlc,
            min_confirmations,
            screener,
            deposit: RwLock::new(None),
        }
    }

    /// Watcher for a stored leg, seeded with any deposit it already recorded
    pub fn from_swap(
        client: Arc<dyn BitcoinClient>,
        swap: &AtomicSwap,
        min_confirmations: u64,
        screener: Option<Arc<dyn Screener>>,
    ) -> WatcherResult<Self> {
        let htlc = UtxoHtlc::from_swap(swap)?;

        let txids: Vec<String> = swap
            .initiate_tx_hashes()
            .into_iter()
            .map(str::to_string)
            .collect();
        let deposit = (!txids.is_empty()).then(|| Deposit {
            txids,
            amount: swap.filled_amount.parse::<u64>().unwrap_or(htlc.amount),
        });

        Ok(Self {
            client,
            htlc,
            min_confirmations,
            screener,
            deposit: RwLock::new(deposit),
        })
    }

    pub fn htlc(&self) -> &UtxoHtlc {
        &self.htlc
    }

    pub fn client(&self) -> &Arc<dyn BitcoinClient> {
        &self.client
    }

    /// Screen the addresses that funded `txids`
    async fn screen(&self, txids: &[String]) -> WatcherResult<()> {
        let screener = match &self.screener {
            Some(screener) => screener,
            None => return Ok(()),
        };

        let history = self.client.get_address_txs(&self.htlc.address).await?;
        let depositors: HashMap<String, Chain> = history
            .iter()
            .filter(|tx| txids.contains(&tx.txid))
            .flat_map(|tx| tx.inputs.iter())
            .filter_map(|input| input.prev_address.clone())
            .map(|address| (address, self.htlc.chain))
            .collect();
        if depositors.is_empty() {
            return Ok(());
        }

        match screener.is_blacklisted(depositors.clone()).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                crate::metrics::record_screener_hit(self.htlc.chain);
                let mut addresses: Vec<String> = depositors.into_keys().collect();
                addresses.sort();
                warn!(
                    "Deposit to {} on {} funded by blacklisted addresses {:?}",
                    self.htlc.address, self.htlc.chain, addresses
                );
                Err(WatcherError::ignorable(SwapperError::Blacklisted {
                    chain: self.htlc.chain,
                    addresses,
                }))
            }
            Err(e) => Err(WatcherError::recoverable(e)),
        }
    }

    async fn detect(&self) -> WatcherResult<Option<Deposit>> {
        if let Some(deposit) = self.deposit.read().await.clone() {
            return Ok(Some(deposit));
        }

        let (utxos, total) = self.client.get_utxos(&self.htlc.address).await?;
        if utxos.is_empty() || total < self.htlc.amount {
            debug!(
                "{} on {} holds {} of {} sat",
                self.htlc.address, self.htlc.chain, total, self.htlc.amount
            );
            // Partial fill: report the amount, memoize nothing
            return Ok((total > 0).then(|| Deposit {
                txids: Vec::new(),
                amount: total,
            }));
        }

        let mut txids: Vec<String> = Vec::new();
        for utxo in &utxos {
            if !txids.contains(&utxo.txid) {
                txids.push(utxo.txid.clone());
            }
        }
        self.screen(&txids).await?;

        info!(
            "Deposit of {} sat detected at {} on {} in {}",
            total,
            self.htlc.address,
            self.htlc.chain,
            txids.join(",")
        );
        let deposit = Deposit {
            txids,
            amount: total,
        };
        *self.deposit.write().await = Some(deposit.clone());
        Ok(Some(deposit))
    }
}

#[async_trait]
impl Watcher for UtxoWatcher {
    fn identifier(&self) -> String {
        self.htlc.address.to_string()
    }

    async fn initiate_status(&self) -> WatcherResult<InitiateStatus> {
        let deposit = match self.detect().await? {
            Some(deposit) if !deposit.txids.is_empty() => deposit,
            Some(partial) => {
                return Ok(InitiateStatus {
                    filled_amount: u128::from(partial.amount),
                    ..Default::default()
                })
            }
            None => return Ok(InitiateStatus::default()),
        };

        let mut block_number = 0;
        let mut confirmations = u64::MAX;
        for txid in &deposit.txids {
            let (height, confs) = self.client.get_confirmations(txid).await?;
            block_number = block_number.max(height);
            confirmations = confirmations.min(confs);
        }

        Ok(InitiateStatus {
            detected: true,
            initiated: confirmations >= self.min_confirmations,
            tx_hash: deposit.txids.join(","),
            block_number,
            confirmations,
            filled_amount: u128::from(deposit.amount),
        })
    }

    async fn is_redeemed(&self) -> WatcherResult<Option<Redemption>> {
        let address = self.htlc.address.to_string();
        let history = self.client.get_address_txs(&self.htlc.address).await?;

        for tx in &history {
            for input in &tx.inputs {
                if input.prev_address.as_deref() != Some(address.as_str())
                    || input.witness.len() != 5
                    || input.witness[3] != [0x01]
                {
                    continue;
                }
                let secret = &input.witness[2];
                if secret_matches(secret, &self.htlc.secret_hash) {
                    return Ok(Some(Redemption {
                        secret: secret.clone(),
                        tx_hash: tx.txid.clone(),
                    }));
                }
                debug!("Ignoring spend {} of {} with a wrong secret", tx.txid, address);
            }
        }
        Ok(None)
    }

    async fn is_refunded(&self) -> WatcherResult<Option<String>> {
        let address = self.htlc.address.to_string();
        let history = self.client.get_address_txs(&self.htlc.address).await?;

        Ok(history
            .iter()
            .find(|tx| {
                tx.inputs.iter().any(|input| {
                    input.prev_address.as_deref() == Some(address.as_str())
                        && input.witness.len() == 4
                        && input.witness[2].is_empty()
                })
            })
            .map(|tx| tx.txid.clone()))
    }

    async fn expired(&self) -> WatcherResult<bool> {
        let status = self.initiate_status().await?;
        if !status.detected || status.block_number == 0 {
            return Ok(false);
        }
        let tip = self.client.get_tip_height().await?;
        Ok(tip >= status.block_number + u64::from(self.htlc.wait_blocks))
    }
}

/// Parse a WIF key the process owns; failure is non-recoverable
pub fn parse_key(wif: &str) -> WatcherResult<PrivateKey> {
    PrivateKey::from_wif(wif)
        .map_err(|e| WatcherError::non_recoverable(SwapperError::Wallet(e.to_string())))
}

fn owned_pubkey(key: &PrivateKey, expected_pkh: &[u8; 20]) -> WatcherResult<PublicKey> {
    let secp = Secp256k1::signing_only();
    let pubkey = PublicKey::from_private_key(&secp, key);
    if &pubkey.pubkey_hash().to_byte_array() != expected_pkh {
        return Err(WatcherError::non_recoverable(SwapperError::Wallet(
            "key does not control the HTLC party address".to_string(),
        )));
    }
    Ok(pubkey)
}

/// Initiator of a UTXO leg
pub struct UtxoInitiator {
    watcher: UtxoWatcher,
    key: PrivateKey,
    pubkey: PublicKey,
    backoff: Backoff,
}

impl UtxoInitiator {
    pub fn new(watcher: UtxoWatcher, key: PrivateKey, backoff: Backoff) -> WatcherResult<Self> {
        let pubkey = owned_pubkey(&key, &watcher.htlc.initiator_pkh)?;
        Ok(Self {
            watcher,
            key,
            pubkey,
            backoff,
        })
    }
}

#[async_trait]
impl InitiatorSwap for UtxoInitiator {
    async fn initiate(&self) -> WatcherResult<String> {
        let status = self.watcher.initiate_status().await?;
        if status.detected {
            debug!("{} already funded by {}", self.watcher.identifier(), status.tx_hash);
            return Ok(status.tx_hash);
        }
        let txid = self
            .watcher
            .client
            .send(&self.watcher.htlc.address, self.watcher.htlc.amount, &self.key)
            .await?;
        info!("Initiated {} with {}", self.watcher.identifier(), txid);
        Ok(txid)
    }

    async fn wait_for_redeem(&self, shutdown: &Shutdown) -> WatcherResult<Redemption> {
        poll_until(self.backoff, shutdown, "redeem", || self.watcher.is_redeemed()).await
    }

    async fn is_redeemed(&self) -> WatcherResult<Option<Redemption>> {
        self.watcher.is_redeemed().await
    }

    async fn refund(&self) -> WatcherResult<String> {
        if let Some(txid) = self.watcher.is_refunded().await? {
            return Ok(txid);
        }
        if !self.watcher.expired().await? {
            return Err(WatcherError::recoverable(SwapperError::Transaction(format!(
                "{} has not expired",
                self.watcher.identifier()
            ))));
        }
        let htlc = &self.watcher.htlc;
        let txid = self
            .watcher
            .client
            .spend(
                &htlc.script,
                htlc.refund_witness(&self.pubkey),
                &self.key,
                htlc.wait_blocks,
            )
            .await?;
        info!("Refunded {} with {}", self.watcher.identifier(), txid);
        Ok(txid)
    }

    async fn expired(&self) -> WatcherResult<bool> {
        self.watcher.expired().await
    }
}

/// Redeemer of a UTXO leg
pub struct UtxoRedeemer {
    watcher: UtxoWatcher,
    key: PrivateKey,
    pubkey: PublicKey,
    backoff: Backoff,
}

impl UtxoRedeemer {
    pub fn new(watcher: UtxoWatcher, key: PrivateKey, backoff: Backoff) -> WatcherResult<Self> {
        let pubkey = owned_pubkey(&key, &watcher.htlc.redeemer_pkh)?;
        Ok(Self {
            watcher,
            key,
            pubkey,
            backoff,
        })
    }
}

#[async_trait]
impl RedeemerSwap for UtxoRedeemer {
    async fn redeem(&self, secret: &[u8]) -> WatcherResult<String> {
        let htlc = &self.watcher.htlc;
        check_secret(secret, &htlc.secret_hash)?;
        let txid = self
            .watcher
            .client
            .spend(&htlc.script, htlc.redeem_witness(&self.pubkey, secret), &self.key, 0)
            .await?;
        info!("Redeemed {} with {}", self.watcher.identifier(), txid);
        Ok(txid)
    }

    async fn wait_for_initiate(&self, shutdown: &Shutdown) -> WatcherResult<String> {
        poll_until(self.backoff, shutdown, "initiation", || self.watcher.is_initiated()).await
    }

    async fn is_initiated(&self) -> WatcherResult<Option<String>> {
        self.watcher.is_initiated().await
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::chain::client::{AddressTx, MockBitcoinClient, TxInput, Utxo};
    use crate::chain::confirmations::confirmations_at;
    use crate::screener::MockScreener;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn utxo(txid: &str, value: u64, height: u64) -> Utxo {
        Utxo {
            txid: txid.to_string(),
            vout: 0,
            value,
            block_height: Some(height),
        }
    }

    fn funding_tx(txid: &str, from: &str) -> AddressTx {
        AddressTx {
            txid: txid.to_string(),
            inputs: vec![TxInput {
                prev_txid: "00".repeat(32),
                prev_vout: 0,
                prev_address: Some(from.to_string()),
                witness: Vec::new(),
            }],
            outputs: Vec::new(),
            block_height: Some(100),
        }
    }

    fn spend_tx(txid: &str, htlc: &UtxoHtlc, witness: Vec<Vec<u8>>) -> AddressTx {
        AddressTx {
            txid: txid.to_string(),
            inputs: vec![TxInput {
                prev_txid: "txHash1".to_string(),
                prev_vout: 0,
                prev_address: Some(htlc.address.to_string()),
                witness,
            }],
            outputs: Vec::new(),
            block_height: Some(110),
        }
    }

    fn two_deposits(client: &mut MockBitcoinClient) {
        client.expect_get_utxos().times(1).returning(|_| {
            Ok((
                vec![utxo("txHash1", 60_000, 100), utxo("txHash2", 40_000, 102)],
                100_000,
            ))
        });
    }

    #[test]
    fn script_commits_to_both_paths() {
        let htlc = UtxoHtlc::from_swap(&swap(100_000, 144)).unwrap();
        let asm = htlc.script.to_asm_string();
        assert!(asm.starts_with("OP_IF OP_SHA256"));
        assert!(asm.contains("OP_CSV"));
        assert!(asm.ends_with("OP_EQUALVERIFY OP_CHECKSIG"));
        assert!(htlc.address.script_pubkey().is_p2wsh());
        assert_eq!(htlc.initiator_pkh, pubkey_hash(&address(&key(1))).unwrap());
    }

    #[test]
    fn mismatched_identifier_is_rejected() {
        let mut leg = swap(100_000, 144);
        leg.on_chain_identifier = address(&key(3)).to_string();
        let err = UtxoHtlc::from_swap(&leg).unwrap_err();
        assert!(err.is_ignorable());
        assert!(matches!(err.source, SwapperError::CounterpartyMismatch { .. }));
    }

    #[test]
    fn malformed_amount_is_ignorable() {
        let mut leg = swap(100_000, 144);
        leg.amount = "-5".to_string();
        assert!(UtxoHtlc::from_swap(&leg).unwrap_err().is_ignorable());
    }

    #[tokio::test]
    async fn multi_utxo_deposit_waits_for_every_confirmation() {
        let tip = Arc::new(AtomicU64::new(103));
        let mut client = MockBitcoinClient::new();
        two_deposits(&mut client);
        let chain_tip = tip.clone();
        client.expect_get_confirmations().returning(move |txid| {
            let height = if txid == "txHash1" { 100 } else { 102 };
            Ok((height, confirmations_at(chain_tip.load(Ordering::SeqCst), height)))
        });

        let watcher =
            UtxoWatcher::from_swap(Arc::new(client), &swap(100_000, 144), 2, None).unwrap();

        let status = watcher.initiate_status().await.unwrap();
        assert!(status.detected);
        assert!(!status.initiated);
        assert_eq!(status.tx_hash, "txHash1,txHash2");
        assert_eq!(status.confirmations, 1);

        tip.store(104, Ordering::SeqCst);
        let status = watcher.initiate_status().await.unwrap();
        assert!(status.initiated);
        assert_eq!(status.block_number, 102);
        assert_eq!(status.filled_amount, 100_000);
    }

    #[tokio::test]
    async fn partial_deposit_is_not_detected() {
        let mut client = MockBitcoinClient::new();
        client
            .expect_get_utxos()
            .returning(|_| Ok((vec![utxo("txHash1", 60_000, 100)], 60_000)));

        let watcher =
            UtxoWatcher::from_swap(Arc::new(client), &swap(100_000, 144), 2, None).unwrap();
        let status = watcher.initiate_status().await.unwrap();
        assert!(!status.detected);
        assert_eq!(status.filled_amount, 60_000);
        assert_eq!(watcher.is_initiated().await.unwrap(), None);
    }

    #[tokio::test]
    async fn blacklisted_depositor_is_rejected() {
        let mut client = MockBitcoinClient::new();
        client.expect_get_utxos().times(2).returning(|_| {
            Ok((vec![utxo("txHash1", 100_000, 100)], 100_000))
        });
        client
            .expect_get_address_txs()
            .returning(|_| Ok(vec![funding_tx("txHash1", "bcrt1qtainted")]));

        let mut screener = MockScreener::new();
        screener
            .expect_is_blacklisted()
            .withf(|addresses| addresses.contains_key("bcrt1qtainted"))
            .returning(|_| Ok(true));

        let watcher = UtxoWatcher::from_swap(
            Arc::new(client),
            &swap(100_000, 144),
            2,
            Some(Arc::new(screener)),
        )
        .unwrap();

        for _ in 0..2 {
            let err = watcher.initiate_status().await.unwrap_err();
            assert!(err.is_ignorable());
            assert!(matches!(err.source, SwapperError::Blacklisted { .. }));
        }
    }

    #[tokio::test]
    async fn clean_depositor_is_accepted() {
        let mut client = MockBitcoinClient::new();
        client
            .expect_get_utxos()
            .times(1)
            .returning(|_| Ok((vec![utxo("txHash1", 100_000, 100)], 100_000)));
        client
            .expect_get_address_txs()
            .times(1)
            .returning(|_| Ok(vec![funding_tx("txHash1", "bcrt1qclean")]));
        client
            .expect_get_confirmations()
            .returning(|_| Ok((100, 5)));

        let mut screener = MockScreener::new();
        screener
            .expect_is_blacklisted()
            .times(1)
            .returning(|_| Ok(false));

        let watcher = UtxoWatcher::from_swap(
            Arc::new(client),
            &swap(100_000, 144),
            2,
            Some(Arc::new(screener)),
        )
        .unwrap();

        let status = watcher.initiate_status().await.unwrap();
        assert!(status.initiated);
        assert_eq!(status.tx_hash, "txHash1");
        // Screened once, then memoized
        assert!(watcher.initiate_status().await.unwrap().initiated);
    }

    #[tokio::test]
    async fn screener_outage_is_recoverable() {
        let mut client = MockBitcoinClient::new();
        client
            .expect_get_utxos()
            .returning(|_| Ok((vec![utxo("txHash1", 100_000, 100)], 100_000)));
        client
            .expect_get_address_txs()
            .returning(|_| Ok(vec![funding_tx("txHash1", "bcrt1qclean")]));

        let mut screener = MockScreener::new();
        screener
            .expect_is_blacklisted()
            .returning(|_| Err(SwapperError::Screener("503".to_string())));

        let watcher = UtxoWatcher::from_swap(
            Arc::new(client),
            &swap(100_000, 144),
            2,
            Some(Arc::new(screener)),
        )
        .unwrap();
        assert!(watcher.initiate_status().await.unwrap_err().is_recoverable());
    }

    #[tokio::test]
    async fn finds_secret_in_redeem_witness() {
        let leg = swap(100_000, 144);
        let htlc = UtxoHtlc::from_swap(&leg).unwrap();
        let pubkey = PublicKey::from_private_key(&Secp256k1::signing_only(), &key(2));

        let mut wrong = htlc.redeem_witness(&pubkey, b"not the secret");
        wrong[0] = vec![0x30; 71];
        let mut right = htlc.redeem_witness(&pubkey, SECRET);
        right[0] = vec![0x30; 71];
        let history = vec![
            spend_tx("bogus", &htlc, wrong),
            spend_tx("redeemTx", &htlc, right),
        ];

        let mut client = MockBitcoinClient::new();
        client
            .expect_get_address_txs()
            .returning(move |_| Ok(history.clone()));

        let watcher = UtxoWatcher::from_swap(Arc::new(client), &leg, 2, None).unwrap();
        let redemption = watcher.is_redeemed().await.unwrap().unwrap();
        assert_eq!(redemption.secret, SECRET.to_vec());
        assert_eq!(redemption.tx_hash, "redeemTx");
        assert_eq!(watcher.is_refunded().await.unwrap(), None);
    }

    #[tokio::test]
    async fn detects_refund_spend() {
        let leg = swap(100_000, 144);
        let htlc = UtxoHtlc::from_swap(&leg).unwrap();
        let pubkey = PublicKey::from_private_key(&Secp256k1::signing_only(), &key(1));
        let history = vec![spend_tx("refundTx", &htlc, htlc.refund_witness(&pubkey))];

        let mut client = MockBitcoinClient::new();
        client
            .expect_get_address_txs()
            .returning(move |_| Ok(history.clone()));

        let watcher = UtxoWatcher::from_swap(Arc::new(client), &leg, 2, None).unwrap();
        assert_eq!(watcher.is_refunded().await.unwrap(), Some("refundTx".to_string()));
        assert_eq!(watcher.is_redeemed().await.unwrap(), None);
    }

    #[tokio::test]
    async fn expires_after_relative_lock() {
        let mut leg = swap(100_000, 10);
        leg.initiate_tx_hash = "txHash1".to_string();

        let tip = Arc::new(AtomicU64::new(109));
        let mut client = MockBitcoinClient::new();
        client
            .expect_get_confirmations()
            .returning(|_| Ok((100, 10)));
        let chain_tip = tip.clone();
        client
            .expect_get_tip_height()
            .returning(move || Ok(chain_tip.load(Ordering::SeqCst)));

        let watcher = UtxoWatcher::from_swap(Arc::new(client), &leg, 2, None).unwrap();
        assert!(!watcher.expired().await.unwrap());
        tip.store(110, Ordering::SeqCst);
        assert!(watcher.expired().await.unwrap());
    }

    #[tokio::test]
    async fn redeemer_rejects_wrong_secret_and_signs_right_one() {
        let leg = swap(100_000, 144);
        let mut client = MockBitcoinClient::new();
        client
            .expect_spend()
            .withf(|_, witness, _, wait| witness.len() == 5 && witness[2] == SECRET && *wait == 0)
            .times(1)
            .returning(|_, _, _, _| Ok("redeemTx".to_string()));

        let watcher = UtxoWatcher::from_swap(Arc::new(client), &leg, 2, None).unwrap();
        let redeemer = UtxoRedeemer::new(watcher, key(2), Backoff::default()).unwrap();

        assert!(redeemer.redeem(b"wrong").await.unwrap_err().is_ignorable());
        assert_eq!(redeemer.redeem(SECRET).await.unwrap(), "redeemTx");
    }

    #[test]
    fn foreign_key_is_non_recoverable() {
        let client = MockBitcoinClient::new();
        let watcher =
            UtxoWatcher::from_swap(Arc::new(client), &swap(100_000, 144), 2, None).unwrap();
        let err = UtxoInitiator::new(watcher, key(9), Backoff::default())
            .err()
            .unwrap();
        assert!(err.is_non_recoverable());
    }
}
