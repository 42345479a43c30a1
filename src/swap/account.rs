//! Account-family HTLC: orders in a shared contract
//!
//! An order is keyed by `sha256(secret_hash || pad32(initiator))`. Evidence
//! comes from the contract's `Initiated`, `Redeemed` and `Refunded` logs,
//! cross-checked against the contract's stored order. On L2 chains the
//! timelock counts L1 blocks, so expiry compares L1 block numbers.

use super::wait::{poll_until, Backoff};
use super::{
    check_secret, secret_matches, InitiateStatus, InitiatorSwap, RedeemerSwap, Redemption, Watcher,
};
use crate::chain::EvmClient;
use crate::error::{SwapperError, WatcherError, WatcherResult};
use crate::events::{parse_log, topics, HtlcEvent};
use crate::model::{AtomicSwap, Chain, ChainFamily};
use crate::screener::Screener;
use crate::shutdown::Shutdown;

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Contract key of an order
pub fn order_id(secret_hash: &[u8; 32], initiator: Address) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(secret_hash);
    hasher.update(H256::from(initiator).as_bytes());
    H256::from_slice(&hasher.finalize())
}

/// Log scan window of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    pub start_block: u64,
    /// Widest `eth_getLogs` request; 0 means unbounded
    pub max_block_range: u64,
}

impl ScanRange {
    /// Inclusive sub-ranges covering `[from, to]`
    fn chunks(&self, from: u64, to: u64) -> Vec<(u64, u64)> {
        let width = if self.max_block_range == 0 {
            u64::MAX
        } else {
            self.max_block_range
        };
        let mut chunks = Vec::new();
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(width - 1).min(to);
            chunks.push((start, end));
            if end == u64::MAX {
                break;
            }
            start = end + 1;
        }
        chunks
    }
}

/// Agreed terms of one account leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTerms {
    pub chain: Chain,
    pub order_id: H256,
    pub initiator: Address,
    pub redeemer: Address,
    pub secret_hash: [u8; 32],
    pub amount: U256,
    pub timelock: u64,
}

impl AccountTerms {
    /// Terms of a stored leg; malformed fields are ignorable
    pub fn from_swap(swap: &AtomicSwap) -> WatcherResult<Self> {
        let parse = |field: &str, value: &str| {
            Address::from_str(value).map_err(|e| {
                WatcherError::ignorable(SwapperError::Validation(format!(
                    "{} '{}': {}",
                    field, value, e
                )))
            })
        };
        let initiator = parse("initiator", &swap.initiator_address)?;
        let redeemer = parse("redeemer", &swap.redeemer_address)?;
        let secret_hash = swap.secret_hash_bytes().map_err(WatcherError::ignorable)?;
        let amount = U256::from(swap.amount().map_err(WatcherError::ignorable)?);
        let timelock = swap.timelock().map_err(WatcherError::ignorable)?;

        let order_id = order_id(&secret_hash, initiator);
        if !swap.on_chain_identifier.is_empty() {
            let stored = H256::from_str(&swap.on_chain_identifier).ok();
            if stored != Some(order_id) {
                return Err(WatcherError::ignorable(SwapperError::CounterpartyMismatch {
                    identifier: swap.on_chain_identifier.clone(),
                    message: format!("terms derive order id {:#x}", order_id),
                }));
            }
        }

        Ok(Self {
            chain: swap.chain,
            order_id,
            initiator,
            redeemer,
            secret_hash,
            amount,
            timelock,
        })
    }
}

/// First accepted initiation
#[derive(Debug, Clone, Copy)]
struct Deposit {
    tx_hash: H256,
    block_number: u64,
    /// Block the timelock counts from; the L1 block on L2 chains
    lock_block: u64,
    amount: U256,
}

#[derive(Debug, Default)]
struct ScanState {
    next_block: u64,
    deposit: Option<Deposit>,
}

/// Observes one order in the HTLC contract
pub struct AccountWatcher {
    client: Arc<dyn EvmClient>,
    terms: AccountTerms,
    min_confirmations: u64,
    range: ScanRange,
    screener: Option<Arc<dyn Screener>>,
    state: RwLock<ScanState>,
}

impl AccountWatcher {
    pub fn new(
        client: Arc<dyn EvmClient>,
        terms: AccountTerms,
        min_confirmations: u64,
        range: ScanRange,
        screener: Option<Arc<dyn Screener>>,
    ) -> Self {
        Self {
            client,
            terms,
            min_confirmations,
            range,
            screener,
            state: RwLock::new(ScanState {
                next_block: range.start_block,
                deposit: None,
            }),
        }
    }

    pub fn from_swap(
        client: Arc<dyn EvmClient>,
        swap: &AtomicSwap,
        min_confirmations: u64,
        range: ScanRange,
        screener: Option<Arc<dyn Screener>>,
    ) -> WatcherResult<Self> {
        let terms = AccountTerms::from_swap(swap)?;
        let mut range = range;
        // A recorded initiation bounds where the logs can be
        if swap.initiate_block_number > 0 && swap.chain.family() == ChainFamily::Account {
            range.start_block = range.start_block.max(swap.initiate_block_number);
        }
        Ok(Self::new(client, terms, min_confirmations, range, screener))
    }

    pub fn terms(&self) -> &AccountTerms {
        &self.terms
    }

    fn is_l2(&self) -> bool {
        self.terms.chain.family() == ChainFamily::AccountL2
    }

    async fn lock_block(&self, block: u64) -> WatcherResult<u64> {
        if self.is_l2() {
            Ok(self.client.l1_block_number(block).await?)
        } else {
            Ok(block)
        }
    }

    /// Events of this order under `topic` in `[from, to]`
    async fn scan(&self, topic: H256, from: u64, to: u64) -> WatcherResult<Vec<HtlcEvent>> {
        let mut events = Vec::new();
        for (start, end) in self.range.chunks(from, to) {
            let logs = self
                .client
                .get_logs(start, end, vec![topic, self.terms.order_id])
                .await?;
            for log in &logs {
                match parse_log(log) {
                    Ok(event) if event.order_id() == self.terms.order_id => events.push(event),
                    Ok(_) => {}
                    Err(e) => {
                        let e = WatcherError::from(e);
                        if !e.is_ignorable() {
                            return Err(e);
                        }
                        debug!("Skipping log on {}: {}", self.terms.chain, e);
                    }
                }
            }
        }
        Ok(events)
    }

    /// Cross-check the contract's stored order against the agreed terms
    async fn verify(&self) -> WatcherResult<U256> {
        let order = self.client.get_order(self.terms.order_id).await?;
        let mismatch = |message: String| {
            Err(WatcherError::ignorable(SwapperError::CounterpartyMismatch {
                identifier: format!("{:#x}", self.terms.order_id),
                message,
            }))
        };

        if order.redeemer != self.terms.redeemer {
            return mismatch(format!(
                "redeemer {:#x}, expected {:#x}",
                order.redeemer, self.terms.redeemer
            ));
        }
        if order.timelock != U256::from(self.terms.timelock) {
            return mismatch(format!(
                "timelock {}, expected {}",
                order.timelock, self.terms.timelock
            ));
        }
        if order.amount < self.terms.amount {
            return mismatch(format!(
                "amount {}, expected at least {}",
                order.amount, self.terms.amount
            ));
        }
        Ok(order.amount)
    }

    async fn screen(&self) -> WatcherResult<()> {
        let screener = match &self.screener {
            Some(screener) => screener,
            None => return Ok(()),
        };
        let addresses: HashMap<String, Chain> =
            HashMap::from([(format!("{:#x}", self.terms.initiator), self.terms.chain)]);

        match screener.is_blacklisted(addresses).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                crate::metrics::record_screener_hit(self.terms.chain);
                warn!(
                    "Order {:#x} on {} initiated by blacklisted {:#x}",
                    self.terms.order_id, self.terms.chain, self.terms.initiator
                );
                Err(WatcherError::ignorable(SwapperError::Blacklisted {
                    chain: self.terms.chain,
                    addresses: vec![format!("{:#x}", self.terms.initiator)],
                }))
            }
            Err(e) => Err(WatcherError::recoverable(e)),
        }
    }

    async fn detect(&self) -> WatcherResult<Option<Deposit>> {
        if let Some(deposit) = self.state.read().await.deposit {
            return Ok(Some(deposit));
        }

        let from = self.state.read().await.next_block;
        let current = self.client.get_current_block().await?;
        if from > current {
            return Ok(None);
        }

        let events = self.scan(*topics::INITIATED, from, current).await?;
        let initiated = events.into_iter().find_map(|event| match event {
            HtlcEvent::Initiated {
                tx_hash,
                block_number,
                ..
            } => Some((tx_hash, block_number)),
            _ => None,
        });

        let (tx_hash, block_number) = match initiated {
            Some(found) => found,
            None => {
                self.state.write().await.next_block = current + 1;
                return Ok(None);
            }
        };

        let amount = self.verify().await?;
        self.screen().await?;
        let lock_block = self.lock_block(block_number).await?;

        info!(
            "Order {:#x} initiated on {} in {:#x} at block {}",
            self.terms.order_id, self.terms.chain, tx_hash, block_number
        );
        let deposit = Deposit {
            tx_hash,
            block_number,
            lock_block,
            amount,
        };
        let mut state = self.state.write().await;
        state.next_block = block_number;
        state.deposit = Some(deposit);
        Ok(Some(deposit))
    }
}

fn to_u128(amount: U256) -> u128 {
    if amount > U256::from(u128::MAX) {
        u128::MAX
    } else {
        amount.as_u128()
    }
}

#[async_trait]
impl Watcher for AccountWatcher {
    fn identifier(&self) -> String {
        format!("{:#x}", self.terms.order_id)
    }

    async fn initiate_status(&self) -> WatcherResult<InitiateStatus> {
        let deposit = match self.detect().await? {
            Some(deposit) => deposit,
            None => return Ok(InitiateStatus::default()),
        };

        let (_, confirmations) = self.client.get_confirmations(deposit.tx_hash).await?;
        Ok(InitiateStatus {
            detected: true,
            initiated: confirmations >= self.min_confirmations,
            tx_hash: format!("{:#x}", deposit.tx_hash),
            block_number: deposit.lock_block,
            confirmations,
            filled_amount: to_u128(deposit.amount),
        })
    }

    async fn is_redeemed(&self) -> WatcherResult<Option<Redemption>> {
        let deposit = match self.detect().await? {
            Some(deposit) => deposit,
            None => return Ok(None),
        };
        let current = self.client.get_current_block().await?;

        for event in self
            .scan(*topics::REDEEMED, deposit.block_number, current)
            .await?
        {
            if let HtlcEvent::Redeemed {
                secret, tx_hash, ..
            } = event
            {
                if secret_matches(&secret, &self.terms.secret_hash) {
                    return Ok(Some(Redemption {
                        secret,
                        tx_hash: format!("{:#x}", tx_hash),
                    }));
                }
                debug!("Ignoring redeem {:#x} with a wrong secret", tx_hash);
            }
        }
        Ok(None)
    }

    async fn is_refunded(&self) -> WatcherResult<Option<String>> {
        let deposit = match self.detect().await? {
            Some(deposit) => deposit,
            None => return Ok(None),
        };
        let current = self.client.get_current_block().await?;

        Ok(self
            .scan(*topics::REFUNDED, deposit.block_number, current)
            .await?
            .first()
            .map(|event| format!("{:#x}", event.tx_hash())))
    }

    async fn expired(&self) -> WatcherResult<bool> {
        let deposit = match self.detect().await? {
            Some(deposit) => deposit,
            None => return Ok(false),
        };
        let current = self.client.get_current_block().await?;
        let current = self.lock_block(current).await?;
        Ok(current > deposit.lock_block + self.terms.timelock)
    }
}

/// Parse a hex private key the process owns; failure is non-recoverable
pub fn parse_wallet(key: &str) -> WatcherResult<LocalWallet> {
    LocalWallet::from_str(key.trim_start_matches("0x"))
        .map_err(|e| WatcherError::non_recoverable(SwapperError::Wallet(e.to_string())))
}

fn owned_wallet(wallet: LocalWallet, expected: Address) -> WatcherResult<LocalWallet> {
    if wallet.address() != expected {
        return Err(WatcherError::non_recoverable(SwapperError::Wallet(format!(
            "wallet {:#x} is not party {:#x}",
            wallet.address(),
            expected
        ))));
    }
    Ok(wallet)
}

/// Initiator of an account leg
pub struct AccountInitiator {
    watcher: AccountWatcher,
    wallet: LocalWallet,
    backoff: Backoff,
}

impl AccountInitiator {
    pub fn new(
        watcher: AccountWatcher,
        wallet: LocalWallet,
        backoff: Backoff,
    ) -> WatcherResult<Self> {
        let wallet = owned_wallet(wallet, watcher.terms.initiator)?;
        Ok(Self {
            watcher,
            wallet,
            backoff,
        })
    }
}

#[async_trait]
impl InitiatorSwap for AccountInitiator {
    async fn initiate(&self) -> WatcherResult<String> {
        let status = self.watcher.initiate_status().await?;
        if status.detected {
            debug!("{} already initiated in {}", self.watcher.identifier(), status.tx_hash);
            return Ok(status.tx_hash);
        }
        let terms = &self.watcher.terms;
        let tx_hash = self
            .watcher
            .client
            .initiate(
                &self.wallet,
                terms.redeemer,
                U256::from(terms.timelock),
                terms.amount,
                terms.secret_hash,
            )
            .await?;
        info!("Initiated {} with {:#x}", self.watcher.identifier(), tx_hash);
        Ok(format!("{:#x}", tx_hash))
    }

    async fn wait_for_redeem(&self, shutdown: &Shutdown) -> WatcherResult<Redemption> {
        poll_until(self.backoff, shutdown, "redeem", || self.watcher.is_redeemed()).await
    }

    async fn is_redeemed(&self) -> WatcherResult<Option<Redemption>> {
        self.watcher.is_redeemed().await
    }

    async fn refund(&self) -> WatcherResult<String> {
        if let Some(tx_hash) = self.watcher.is_refunded().await? {
            return Ok(tx_hash);
        }
        if !self.watcher.expired().await? {
            return Err(WatcherError::recoverable(SwapperError::Transaction(format!(
                "{} has not expired",
                self.watcher.identifier()
            ))));
        }
        let tx_hash = self
            .watcher
            .client
            .refund(&self.wallet, self.watcher.terms.order_id)
            .await?;
        info!("Refunded {} with {:#x}", self.watcher.identifier(), tx_hash);
        Ok(format!("{:#x}", tx_hash))
    }

    async fn expired(&self) -> WatcherResult<bool> {
        self.watcher.expired().await
    }
}

/// Redeemer of an account leg
pub struct AccountRedeemer {
    watcher: AccountWatcher,
    wallet: LocalWallet,
    backoff: Backoff,
}

impl AccountRedeemer {
    pub fn new(
        watcher: AccountWatcher,
        wallet: LocalWallet,
        backoff: Backoff,
    ) -> WatcherResult<Self> {
        let wallet = owned_wallet(wallet, watcher.terms.redeemer)?;
        Ok(Self {
            watcher,
            wallet,
            backoff,
        })
    }
}

#[async_trait]
impl RedeemerSwap for AccountRedeemer {
    async fn redeem(&self, secret: &[u8]) -> WatcherResult<String> {
        check_secret(secret, &self.watcher.terms.secret_hash)?;
        let tx_hash = self
            .watcher
            .client
            .redeem(&self.wallet, self.watcher.terms.order_id, secret.to_vec())
            .await?;
        info!("Redeemed {} with {:#x}", self.watcher.identifier(), tx_hash);
        Ok(format!("{:#x}", tx_hash))
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
    use crate::chain::client::{MockEvmClient, OnChainOrder};
    use crate::events::test_logs;
    use crate::screener::MockScreener;
    use std::sync::atomic::{AtomicU64, Ordering};

    const RANGE: ScanRange = ScanRange {
        start_block: 0,
        max_block_range: 100,
    };

    fn terms() -> AccountTerms {
        AccountTerms::from_swap(&swap(Chain::EthereumLocalnet, 1_000, 50)).unwrap()
    }

    fn stored(terms: &AccountTerms, amount: u64, timelock: u64) -> OnChainOrder {
        OnChainOrder {
            initiator: terms.initiator,
            redeemer: terms.redeemer,
            initiated_at: U256::from(120u64),
            timelock: U256::from(timelock),
            amount: U256::from(amount),
            is_fulfilled: false,
        }
    }

    /// Client with an initiation at block 120 and the given order state
    fn initiated_client(order: OnChainOrder) -> MockEvmClient {
        let id = terms().order_id;
        let mut client = MockEvmClient::new();
        client.expect_get_current_block().returning(|| Ok(250));
        client
            .expect_get_logs()
            .withf(|_, _, topics| topics[0] == *topics::INITIATED)
            .returning(move |from, to, _| {
                Ok(if (from..=to).contains(&120) {
                    vec![test_logs::initiated(
                        id,
                        H256::from(secret_hash()),
                        U256::from(1_000u64),
                        120,
                        H256::repeat_byte(0xaa),
                    )]
                } else {
                    Vec::new()
                })
            });
        client
            .expect_get_order()
            .returning(move |_| Ok(order.clone()));
        client
    }

    #[test]
    fn order_id_hashes_secret_hash_and_padded_initiator() {
        let initiator = wallet(1).address();
        let mut preimage = secret_hash().to_vec();
        preimage.extend_from_slice(&[0u8; 12]);
        preimage.extend_from_slice(initiator.as_bytes());
        let expected = H256::from_slice(&Sha256::digest(&preimage));
        assert_eq!(order_id(&secret_hash(), initiator), expected);
    }

    #[test]
    fn chunks_cover_range() {
        assert_eq!(
            RANGE.chunks(0, 250),
            vec![(0, 99), (100, 199), (200, 250)]
        );
        let unbounded = ScanRange {
            start_block: 0,
            max_block_range: 0,
        };
        assert_eq!(unbounded.chunks(5, 9), vec![(5, 9)]);
        assert!(RANGE.chunks(10, 9).is_empty());
    }

    #[test]
    fn stored_identifier_must_match_terms() {
        let mut leg = swap(Chain::Ethereum, 1_000, 50);
        leg.on_chain_identifier = format!("{:#x}", H256::repeat_byte(1));
        assert!(AccountTerms::from_swap(&leg).unwrap_err().is_ignorable());

        leg.on_chain_identifier = format!("{:#x}", terms().order_id);
        assert!(AccountTerms::from_swap(&leg).is_ok());
    }

    #[tokio::test]
    async fn detects_initiation_and_memoizes_it() {
        let t = terms();
        let mut client = initiated_client(stored(&t, 1_000, 50));
        let confirmations = Arc::new(AtomicU64::new(2));
        let confs = confirmations.clone();
        client
            .expect_get_confirmations()
            .returning(move |_| Ok((120, confs.load(Ordering::SeqCst))));

        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);
        let status = watcher.initiate_status().await.unwrap();
        assert!(status.detected);
        assert!(!status.initiated);
        assert_eq!(status.block_number, 120);
        assert_eq!(status.filled_amount, 1_000);
        assert_eq!(status.tx_hash, format!("{:#x}", H256::repeat_byte(0xaa)));

        confirmations.store(3, Ordering::SeqCst);
        assert!(watcher.initiate_status().await.unwrap().initiated);
    }

    #[tokio::test]
    async fn wrong_timelock_is_a_counterparty_mismatch() {
        let t = terms();
        let client = initiated_client(stored(&t, 1_000, 10));
        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);

        let err = watcher.initiate_status().await.unwrap_err();
        assert!(err.is_ignorable());
        assert!(matches!(err.source, SwapperError::CounterpartyMismatch { .. }));
    }

    #[tokio::test]
    async fn underfunded_order_is_a_counterparty_mismatch() {
        let t = terms();
        let client = initiated_client(stored(&t, 999, 50));
        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);
        assert!(watcher.initiate_status().await.unwrap_err().is_ignorable());
    }

    #[tokio::test]
    async fn wrong_redeemer_is_a_counterparty_mismatch() {
        let t = terms();
        let mut order = stored(&t, 1_000, 50);
        order.redeemer = wallet(3).address();
        let client = initiated_client(order);
        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);

        let err = watcher.initiate_status().await.unwrap_err();
        assert!(err.is_ignorable());
        match err.source {
            SwapperError::CounterpartyMismatch { ref message, .. } => {
                assert!(message.starts_with("redeemer"), "{}", message)
            }
            ref other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn l2_initiation_records_the_l1_block() {
        let leg = swap(Chain::ArbitrumLocalnet, 1_000, 50);
        let t = AccountTerms::from_swap(&leg).unwrap();
        let mut client = initiated_client(stored(&t, 1_000, 50));
        client
            .expect_l1_block_number()
            .withf(|block| *block == 120)
            .returning(|_| Ok(1_000));
        client
            .expect_get_confirmations()
            .returning(|_| Ok((120, 5)));

        let watcher = AccountWatcher::from_swap(Arc::new(client), &leg, 3, RANGE, None).unwrap();
        let status = watcher.initiate_status().await.unwrap();
        assert!(status.initiated);
        assert_eq!(status.block_number, 1_000);
    }

    #[tokio::test]
    async fn blacklisted_initiator_is_rejected() {
        let t = terms();
        let client = initiated_client(stored(&t, 1_000, 50));
        let mut screener = MockScreener::new();
        screener.expect_is_blacklisted().returning(|_| Ok(true));

        let watcher =
            AccountWatcher::new(Arc::new(client), t, 3, RANGE, Some(Arc::new(screener)));
        let err = watcher.initiate_status().await.unwrap_err();
        assert!(matches!(err.source, SwapperError::Blacklisted { .. }));
    }

    #[tokio::test]
    async fn nothing_initiated_advances_the_cursor() {
        let mut client = MockEvmClient::new();
        client.expect_get_current_block().returning(|| Ok(150));
        client
            .expect_get_logs()
            .times(2)
            .returning(|_, _, _| Ok(Vec::new()));

        let watcher = AccountWatcher::new(Arc::new(client), terms(), 3, RANGE, None);
        assert_eq!(watcher.initiate_status().await.unwrap(), InitiateStatus::default());
        // Cursor now past block 150: nothing left to scan
        assert_eq!(watcher.initiate_status().await.unwrap(), InitiateStatus::default());
    }

    #[tokio::test]
    async fn extracts_matching_secret_from_redeem_logs() {
        let t = terms();
        let id = t.order_id;
        let mut client = initiated_client(stored(&t, 1_000, 50));
        client
            .expect_get_logs()
            .withf(|from, _, topics| topics[0] == *topics::REDEEMED && *from == 120)
            .returning(move |_, _, _| {
                let hash = H256::from(secret_hash());
                Ok(vec![
                    test_logs::redeemed(id, hash, b"forged", 130, H256::repeat_byte(1)),
                    test_logs::redeemed(id, hash, SECRET, 131, H256::repeat_byte(2)),
                ])
            });

        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);
        let redemption = watcher.is_redeemed().await.unwrap().unwrap();
        assert_eq!(redemption.secret, SECRET.to_vec());
        assert_eq!(redemption.tx_hash, format!("{:#x}", H256::repeat_byte(2)));
    }

    #[tokio::test]
    async fn finds_refund_log() {
        let t = terms();
        let id = t.order_id;
        let mut client = initiated_client(stored(&t, 1_000, 50));
        client
            .expect_get_logs()
            .withf(|_, _, topics| topics[0] == *topics::REFUNDED)
            .returning(move |_, _, _| Ok(vec![test_logs::refunded(id, 200, H256::repeat_byte(3))]));

        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);
        assert_eq!(
            watcher.is_refunded().await.unwrap(),
            Some(format!("{:#x}", H256::repeat_byte(3)))
        );
    }

    #[tokio::test]
    async fn l2_expiry_counts_l1_blocks() {
        let leg = swap(Chain::ArbitrumLocalnet, 1_000, 50);
        let t = AccountTerms::from_swap(&leg).unwrap();
        let mut client = initiated_client(stored(&t, 1_000, 50));
        let l1_tip = Arc::new(AtomicU64::new(1_050));
        let tip = l1_tip.clone();
        // L2 block 120 was sequenced against L1 block 1000
        client.expect_l1_block_number().returning(move |block| {
            Ok(if block == 120 {
                1_000
            } else {
                tip.load(Ordering::SeqCst)
            })
        });

        let watcher = AccountWatcher::from_swap(Arc::new(client), &leg, 3, RANGE, None).unwrap();
        assert!(!watcher.expired().await.unwrap());
        l1_tip.store(1_051, Ordering::SeqCst);
        assert!(watcher.expired().await.unwrap());
    }

    #[tokio::test]
    async fn initiator_skips_when_already_initiated() {
        let t = terms();
        let mut client = initiated_client(stored(&t, 1_000, 50));
        client
            .expect_get_confirmations()
            .returning(|_| Ok((120, 5)));
        client.expect_initiate().never();

        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);
        let initiator = AccountInitiator::new(watcher, wallet(1), Backoff::default()).unwrap();
        assert_eq!(
            initiator.initiate().await.unwrap(),
            format!("{:#x}", H256::repeat_byte(0xaa))
        );
    }

    #[tokio::test]
    async fn redeemer_submits_only_the_right_secret() {
        let t = terms();
        let id = t.order_id;
        let mut client = MockEvmClient::new();
        client
            .expect_redeem()
            .withf(move |_, order, secret| *order == id && secret.as_slice() == SECRET)
            .times(1)
            .returning(|_, _, _| Ok(H256::repeat_byte(7)));

        let watcher = AccountWatcher::new(Arc::new(client), t, 3, RANGE, None);
        let redeemer = AccountRedeemer::new(watcher, wallet(2), Backoff::default()).unwrap();
        assert!(redeemer.redeem(b"guess").await.unwrap_err().is_ignorable());
        assert_eq!(
            redeemer.redeem(SECRET).await.unwrap(),
            format!("{:#x}", H256::repeat_byte(7))
        );
    }

    #[test]
    fn wallet_must_be_the_party() {
        let watcher = AccountWatcher::new(Arc::new(MockEvmClient::new()), terms(), 3, RANGE, None);
        let err = AccountRedeemer::new(watcher, wallet(1), Backoff::default())
            .err()
            .unwrap();
        assert!(err.is_non_recoverable());
        assert!(parse_wallet("not a key").unwrap_err().is_non_recoverable());
    }
}
