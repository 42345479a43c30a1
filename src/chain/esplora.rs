//! Esplora-backed UTXO chain client with multi-endpoint failover

use super::confirmations::confirmations_at;
use super::client::{AddressTx, BitcoinClient, TxInput, TxOutput, Utxo};
use crate::config::ChainConfig;
use crate::error::{SwapperError, SwapperResult};
use crate::model::Chain;
use crate::swap::utxo::SIGNATURE_PLACEHOLDER;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::secp256k1::{self, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address as BtcAddress, Amount, Network, OutPoint, PrivateKey, ScriptBuf, Sequence,
    Transaction, TxIn, TxOut, Txid, Witness,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outputs below this are not worth creating
const DUST_LIMIT_SAT: u64 = 546;

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraPrevout {
    scriptpubkey_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    txid: String,
    vout: u32,
    prevout: Option<EsploraPrevout>,
    #[serde(default)]
    witness: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    vin: Vec<EsploraVin>,
    vout: Vec<EsploraVout>,
    status: EsploraStatus,
}

/// Esplora REST client
pub struct EsploraClient {
    chain: Chain,
    network: Network,
    base_urls: Vec<String>,
    current: AtomicUsize,
    http: reqwest::Client,
    fee_rate_sat_vb: u64,
}

impl EsploraClient {
    pub fn new(config: &ChainConfig) -> SwapperResult<Self> {
        let network = config.chain.bitcoin_network().ok_or_else(|| {
            SwapperError::Config(format!("{} is not a UTXO chain", config.chain))
        })?;
        if config.rpc_urls.is_empty() {
            return Err(SwapperError::rpc(config.chain, "No valid Esplora endpoints"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SwapperError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            chain: config.chain,
            network,
            base_urls: config
                .rpc_urls
                .iter()
                .map(|u| u.trim_end_matches('/').to_string())
                .collect(),
            current: AtomicUsize::new(0),
            http,
            fee_rate_sat_vb: config.fee_rate_sat_vb,
        })
    }

    fn base_url(&self) -> &str {
        let idx = self.current.load(Ordering::Relaxed);
        &self.base_urls[idx % self.base_urls.len()]
    }

    /// Switch to next available endpoint
    fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.base_urls.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to endpoint {}", self.chain, next);
    }

    async fn get_text(&self, path: &str) -> SwapperResult<String> {
        let mut last_error = None;
        for _ in 0..self.base_urls.len() {
            let url = format!("{}{}", self.base_url(), path);
            let result = async {
                self.http
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await
            }
            .await;

            match result {
                Ok(body) => return Ok(body),
                Err(e) => {
                    warn!("GET {} failed on chain {}: {}", path, self.chain, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(SwapperError::rpc(
            self.chain,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "All endpoints failed".to_string()),
        ))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SwapperResult<T> {
        let body = self.get_text(path).await?;
        serde_json::from_str(&body)
            .map_err(|e| SwapperError::rpc(self.chain, format!("decoding {}: {}", path, e)))
    }

    async fn broadcast(&self, tx: &Transaction) -> SwapperResult<String> {
        let url = format!("{}/tx", self.base_url());
        let response = self
            .http
            .post(&url)
            .body(serialize_hex(tx))
            .send()
            .await
            .map_err(|e| SwapperError::rpc(self.chain, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SwapperError::rpc(self.chain, e))?;
        if !status.is_success() {
            return Err(SwapperError::Transaction(format!(
                "broadcast rejected ({}): {}",
                status, body
            )));
        }

        let txid = body.trim().to_string();
        info!("Broadcast {} on {}", txid, self.chain);
        Ok(txid)
    }

    /// P2WPKH wallet of `key` on this network
    fn wallet(&self, key: &PrivateKey) -> SwapperResult<(bitcoin::PublicKey, ScriptBuf)> {
        let secp = Secp256k1::signing_only();
        let pubkey = bitcoin::PublicKey {
            compressed: true,
            inner: key.inner.public_key(&secp),
        };
        let wpkh = pubkey
            .wpubkey_hash()
            .map_err(|e| SwapperError::Wallet(e.to_string()))?;
        Ok((pubkey, ScriptBuf::new_p2wpkh(&wpkh)))
    }

    fn wallet_address(&self, script: &ScriptBuf) -> SwapperResult<BtcAddress> {
        BtcAddress::from_script(script, self.network)
            .map_err(|e| SwapperError::Wallet(e.to_string()))
    }

    fn fee(&self, vsize: u64) -> u64 {
        self.fee_rate_sat_vb.max(1) * vsize
    }

    fn outpoint(&self, utxo: &Utxo) -> SwapperResult<OutPoint> {
        let txid = Txid::from_str(&utxo.txid)
            .map_err(|e| SwapperError::rpc(self.chain, format!("txid {}: {}", utxo.txid, e)))?;
        Ok(OutPoint::new(txid, utxo.vout))
    }
}

fn sign_digest(
    secp: &Secp256k1<secp256k1::SignOnly>,
    digest: &[u8],
    key: &PrivateKey,
) -> SwapperResult<Vec<u8>> {
    let message = secp256k1::Message::from_digest_slice(digest)
        .map_err(|e| SwapperError::Wallet(e.to_string()))?;
    let signature = secp.sign_ecdsa(&message, &key.inner);
    let mut serialized = signature.serialize_der().to_vec();
    serialized.push(EcdsaSighashType::All as u8);
    Ok(serialized)
}

/// Rough virtual size of a segwit spend
fn estimate_vsize(inputs: usize, witness_bytes: usize, outputs: usize) -> u64 {
    (11 + inputs * (41 + witness_bytes.div_ceil(4)) + outputs * 31) as u64
}

#[async_trait]
impl BitcoinClient for EsploraClient {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn get_tip_height(&self) -> SwapperResult<u64> {
        let body = self.get_text("/blocks/tip/height").await?;
        body.trim()
            .parse()
            .map_err(|e| SwapperError::rpc(self.chain, format!("tip height '{}': {}", body, e)))
    }

    async fn get_confirmations(&self, txid: &str) -> SwapperResult<(u64, u64)> {
        let status: EsploraStatus = self.get_json(&format!("/tx/{}/status", txid)).await?;
        match (status.confirmed, status.block_height) {
            (true, Some(height)) => {
                let tip = self.get_tip_height().await?;
                Ok((height, confirmations_at(tip, height)))
            }
            _ => Ok((0, 0)),
        }
    }

    async fn get_utxos(&self, address: &BtcAddress) -> SwapperResult<(Vec<Utxo>, u64)> {
        let raw: Vec<EsploraUtxo> = self
            .get_json(&format!("/address/{}/utxo", address))
            .await?;
        let utxos: Vec<Utxo> = raw
            .into_iter()
            .map(|u| Utxo {
                txid: u.txid,
                vout: u.vout,
                value: u.value,
                block_height: u.status.block_height.filter(|_| u.status.confirmed),
            })
            .collect();
        let total = utxos.iter().map(|u| u.value).sum();
        debug!("{} holds {} sat in {} outputs", address, total, utxos.len());
        Ok((utxos, total))
    }

    async fn get_address_txs(&self, address: &BtcAddress) -> SwapperResult<Vec<AddressTx>> {
        let raw: Vec<EsploraTx> = self
            .get_json(&format!("/address/{}/txs", address))
            .await?;

        raw.into_iter()
            .map(|tx| {
                let inputs = tx
                    .vin
                    .into_iter()
                    .map(|vin| {
                        let witness = vin
                            .witness
                            .iter()
                            .map(hex::decode)
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(|e| {
                                SwapperError::rpc(self.chain, format!("witness hex: {}", e))
                            })?;
                        Ok(TxInput {
                            prev_txid: vin.txid,
                            prev_vout: vin.vout,
                            prev_address: vin.prevout.and_then(|p| p.scriptpubkey_address),
                            witness,
                        })
                    })
                    .collect::<SwapperResult<Vec<_>>>()?;
                Ok(AddressTx {
                    txid: tx.txid,
                    inputs,
                    outputs: tx
                        .vout
                        .into_iter()
                        .map(|o| TxOutput {
                            address: o.scriptpubkey_address,
                            value: o.value,
                        })
                        .collect(),
                    block_height: tx.status.block_height.filter(|_| tx.status.confirmed),
                })
            })
            .collect()
    }

    async fn send(&self, to: &BtcAddress, amount: u64, key: &PrivateKey) -> SwapperResult<String> {
        let (pubkey, wallet_script) = self.wallet(key)?;
        let wallet_address = self.wallet_address(&wallet_script)?;
        let (utxos, _) = self.get_utxos(&wallet_address).await?;

        // Largest first until amount plus fee is covered
        let mut candidates = utxos;
        candidates.sort_by(|a, b| b.value.cmp(&a.value));
        let mut selected = Vec::new();
        let mut selected_value = 0u64;
        let mut fee = 0u64;
        for utxo in candidates {
            selected_value += utxo.value;
            selected.push(utxo);
            fee = self.fee(estimate_vsize(selected.len(), 108, 2));
            if selected_value >= amount + fee {
                break;
            }
        }
        if selected_value < amount + fee {
            return Err(SwapperError::InsufficientBalance {
                chain: self.chain,
                have: selected_value.to_string(),
                need: (amount + fee).to_string(),
            });
        }

        let mut output = vec![TxOut {
            value: Amount::from_sat(amount),
            script_pubkey: to.script_pubkey(),
        }];
        let change = selected_value - amount - fee;
        if change > DUST_LIMIT_SAT {
            output.push(TxOut {
                value: Amount::from_sat(change),
                script_pubkey: wallet_script.clone(),
            });
        }

        let input = selected
            .iter()
            .map(|utxo| {
                Ok(TxIn {
                    previous_output: self.outpoint(utxo)?,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                })
            })
            .collect::<SwapperResult<Vec<_>>>()?;

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        };

        let secp = Secp256k1::signing_only();
        let unsigned = tx.clone();
        let mut cache = SighashCache::new(&unsigned);
        for (ix, utxo) in selected.iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(
                    ix,
                    &wallet_script,
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| SwapperError::Wallet(e.to_string()))?;
            let signature = sign_digest(&secp, &sighash[..], key)?;
            tx.input[ix].witness = Witness::from_slice(&[signature, pubkey.to_bytes()]);
        }

        self.broadcast(&tx).await
    }

    async fn spend(
        &self,
        script: &ScriptBuf,
        witness: Vec<Vec<u8>>,
        key: &PrivateKey,
        wait_blocks: u16,
    ) -> SwapperResult<String> {
        let htlc_address = BtcAddress::p2wsh(script, self.network);
        let (utxos, total) = self.get_utxos(&htlc_address).await?;
        if utxos.is_empty() {
            return Err(SwapperError::InsufficientBalance {
                chain: self.chain,
                have: "0".to_string(),
                need: "1".to_string(),
            });
        }

        let (_, destination) = self.wallet(key)?;
        let witness_bytes = witness.iter().map(|w| w.len().max(72) + 1).sum::<usize>();
        let fee = self.fee(estimate_vsize(utxos.len(), witness_bytes, 1));
        if total <= fee + DUST_LIMIT_SAT {
            return Err(SwapperError::InsufficientBalance {
                chain: self.chain,
                have: total.to_string(),
                need: (fee + DUST_LIMIT_SAT + 1).to_string(),
            });
        }

        let sequence = if wait_blocks > 0 {
            Sequence::from_height(wait_blocks)
        } else {
            Sequence::ENABLE_RBF_NO_LOCKTIME
        };
        let input = utxos
            .iter()
            .map(|utxo| {
                Ok(TxIn {
                    previous_output: self.outpoint(utxo)?,
                    script_sig: ScriptBuf::new(),
                    sequence,
                    witness: Witness::new(),
                })
            })
            .collect::<SwapperResult<Vec<_>>>()?;

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output: vec![TxOut {
                value: Amount::from_sat(total - fee),
                script_pubkey: destination,
            }],
        };

        let secp = Secp256k1::signing_only();
        let unsigned = tx.clone();
        let mut cache = SighashCache::new(&unsigned);
        for (ix, utxo) in utxos.iter().enumerate() {
            let sighash = cache
                .p2wsh_signature_hash(
                    ix,
                    script,
                    Amount::from_sat(utxo.value),
                    EcdsaSighashType::All,
                )
                .map_err(|e| SwapperError::Wallet(e.to_string()))?;
            let signature = sign_digest(&secp, &sighash[..], key)?;
            let elements: Vec<Vec<u8>> = witness
                .iter()
                .map(|element| {
                    if element.as_slice() == SIGNATURE_PLACEHOLDER {
                        signature.clone()
                    } else {
                        element.clone()
                    }
                })
                .collect();
            tx.input[ix].witness = Witness::from_slice(&elements);
        }

        debug!(
            "Spending {} outputs ({} sat) from {} on {}",
            utxos.len(),
            total,
            htlc_address,
            self.chain
        );
        self.broadcast(&tx).await
    }
}
