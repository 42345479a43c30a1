//! Two-party swap sequencing over the protocol roles
//!
//! Initiator: lock own leg, wait for the counterparty's lock, redeem it
//! (revealing the secret). Follower: wait for the initiator's lock, lock own
//! leg, wait for the initiator's redeem, redeem the initiator's leg with the
//! revealed secret. Either side refunds its own leg once it expires.

use super::wait::{poll_until, Backoff};
use super::{InitiatorSwap, RedeemerSwap};
use crate::error::WatcherResult;
use crate::shutdown::Shutdown;

use tracing::{info, warn};

/// How one party's swap ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Counterparty leg claimed
    Redeemed {
        initiate_tx: String,
        redeem_tx: String,
        secret: Vec<u8>,
    },
    /// Own leg reclaimed after expiry
    Refunded {
        initiate_tx: String,
        refund_tx: String,
    },
}

async fn wait_for_expiry(
    own: &dyn InitiatorSwap,
    backoff: Backoff,
    shutdown: &Shutdown,
) -> WatcherResult<()> {
    poll_until(backoff, shutdown, "expiry", || async {
        Ok(own.expired().await?.then_some(()))
    })
    .await
}

async fn refund(
    own: &dyn InitiatorSwap,
    initiate_tx: String,
    backoff: Backoff,
    shutdown: &Shutdown,
) -> WatcherResult<SwapOutcome> {
    let refund_tx = poll_until(backoff, shutdown, "refund", || async {
        own.refund().await.map(Some)
    })
    .await?;
    Ok(SwapOutcome::Refunded {
        initiate_tx,
        refund_tx,
    })
}

async fn redeem(
    counterparty: &dyn RedeemerSwap,
    secret: &[u8],
    backoff: Backoff,
    shutdown: &Shutdown,
) -> WatcherResult<String> {
    poll_until(backoff, shutdown, "redeem submission", || async {
        counterparty.redeem(secret).await.map(Some)
    })
    .await
}

/// Run the initiator side to completion
pub async fn run_initiator(
    own: &dyn InitiatorSwap,
    counterparty: &dyn RedeemerSwap,
    secret: &[u8],
    backoff: Backoff,
    shutdown: &Shutdown,
) -> WatcherResult<SwapOutcome> {
    let initiate_tx = own.initiate().await?;
    info!("Initiated own leg in {}, waiting for counterparty", initiate_tx);

    let counterparty_locked = tokio::select! {
        biased;
        initiated = counterparty.wait_for_initiate(shutdown) => Some(initiated?),
        expired = wait_for_expiry(own, backoff, shutdown) => {
            expired?;
            None
        }
    };

    match counterparty_locked {
        Some(counterparty_tx) => {
            info!("Counterparty locked in {}, redeeming", counterparty_tx);
            let redeem_tx = redeem(counterparty, secret, backoff, shutdown).await?;
            Ok(SwapOutcome::Redeemed {
                initiate_tx,
                redeem_tx,
                secret: secret.to_vec(),
            })
        }
        None => {
            warn!("Own leg {} expired before the counterparty locked", initiate_tx);
            refund(own, initiate_tx, backoff, shutdown).await
        }
    }
}

/// Run the follower side to completion
pub async fn run_follower(
    counterparty: &dyn RedeemerSwap,
    own: &dyn InitiatorSwap,
    backoff: Backoff,
    shutdown: &Shutdown,
) -> WatcherResult<SwapOutcome> {
    let counterparty_tx = counterparty.wait_for_initiate(shutdown).await?;
    info!("Initiator locked in {}, locking own leg", counterparty_tx);
    let initiate_tx = own.initiate().await?;

    let redeemed = tokio::select! {
        biased;
        redemption = own.wait_for_redeem(shutdown) => Some(redemption?),
        expired = wait_for_expiry(own, backoff, shutdown) => {
            expired?;
            // A redeem mined after nominal expiry still wins
            own.is_redeemed().await?
        }
    };

    match redeemed {
        Some(redemption) => {
            info!(
                "Own leg redeemed in {}, claiming counterparty leg",
                redemption.tx_hash
            );
            let redeem_tx = redeem(counterparty, &redemption.secret, backoff, shutdown).await?;
            Ok(SwapOutcome::Redeemed {
                initiate_tx,
                redeem_tx,
                secret: redemption.secret,
            })
        }
        None => {
            warn!("Own leg {} expired unredeemed", initiate_tx);
            refund(own, initiate_tx, backoff, shutdown).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SwapperError, WatcherError};
    use crate::swap::{check_secret, Redemption};
    use async_trait::async_trait;
    use sha2::{Digest, Sha256};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const SECRET: &[u8] = b"orchestrated secret";

    #[derive(Default)]
    struct LegState {
        initiated: Option<String>,
        redeemed: Option<Redemption>,
        refunded: Option<String>,
        expired: bool,
    }

    /// In-memory leg playing both roles
    #[derive(Clone)]
    struct FakeLeg {
        name: &'static str,
        secret_hash: [u8; 32],
        state: Arc<Mutex<LegState>>,
    }

    impl FakeLeg {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                secret_hash: Sha256::digest(SECRET).into(),
                state: Arc::default(),
            }
        }

        fn expire(&self) {
            self.state.lock().unwrap().expired = true;
        }
    }

    fn fast() -> Backoff {
        Backoff::new(Duration::from_millis(10), Duration::from_millis(10))
    }

    #[async_trait]
    impl InitiatorSwap for FakeLeg {
        async fn initiate(&self) -> WatcherResult<String> {
            let tx = format!("{}-initiate", self.name);
            self.state.lock().unwrap().initiated = Some(tx.clone());
            Ok(tx)
        }

        async fn wait_for_redeem(&self, shutdown: &Shutdown) -> WatcherResult<Redemption> {
            poll_until(fast(), shutdown, "redeem", || async {
                Ok(self.state.lock().unwrap().redeemed.clone())
            })
            .await
        }

        async fn is_redeemed(&self) -> WatcherResult<Option<Redemption>> {
            Ok(self.state.lock().unwrap().redeemed.clone())
        }

        async fn refund(&self) -> WatcherResult<String> {
            let mut state = self.state.lock().unwrap();
            if !state.expired {
                return Err(WatcherError::recoverable(SwapperError::Transaction(
                    "not expired".to_string(),
                )));
            }
            let tx = format!("{}-refund", self.name);
            state.refunded = Some(tx.clone());
            Ok(tx)
        }

        async fn expired(&self) -> WatcherResult<bool> {
            Ok(self.state.lock().unwrap().expired)
        }
    }

    #[async_trait]
    impl RedeemerSwap for FakeLeg {
        async fn redeem(&self, secret: &[u8]) -> WatcherResult<String> {
            check_secret(secret, &self.secret_hash)?;
            let tx = format!("{}-redeem", self.name);
            self.state.lock().unwrap().redeemed = Some(Redemption {
                secret: secret.to_vec(),
                tx_hash: tx.clone(),
            });
            Ok(tx)
        }

        async fn wait_for_initiate(&self, shutdown: &Shutdown) -> WatcherResult<String> {
            poll_until(fast(), shutdown, "initiation", || async {
                Ok(self.state.lock().unwrap().initiated.clone())
            })
            .await
        }

        async fn is_initiated(&self) -> WatcherResult<Option<String>> {
            Ok(self.state.lock().unwrap().initiated.clone())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn both_parties_redeem() {
        let leg_a = FakeLeg::new("a");
        let leg_b = FakeLeg::new("b");
        let shutdown = Shutdown::never();

        let (initiator, follower) = tokio::join!(
            run_initiator(&leg_a, &leg_b, SECRET, fast(), &shutdown),
            run_follower(&leg_a, &leg_b, fast(), &shutdown),
        );

        assert_eq!(
            initiator.unwrap(),
            SwapOutcome::Redeemed {
                initiate_tx: "a-initiate".to_string(),
                redeem_tx: "b-redeem".to_string(),
                secret: SECRET.to_vec(),
            }
        );
        assert_eq!(
            follower.unwrap(),
            SwapOutcome::Redeemed {
                initiate_tx: "b-initiate".to_string(),
                redeem_tx: "a-redeem".to_string(),
                secret: SECRET.to_vec(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initiator_refunds_when_counterparty_never_locks() {
        let leg_a = FakeLeg::new("a");
        let leg_b = FakeLeg::new("b");
        let expiring = leg_a.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            expiring.expire();
        });

        let outcome = run_initiator(&leg_a, &leg_b, SECRET, fast(), &Shutdown::never())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SwapOutcome::Refunded {
                initiate_tx: "a-initiate".to_string(),
                refund_tx: "a-refund".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn follower_prefers_redeem_over_refund() {
        let leg_a = FakeLeg::new("a");
        let leg_b = FakeLeg::new("b");
        leg_a.initiate().await.unwrap();
        // Redeemed and expired in the same tick
        RedeemerSwap::redeem(&leg_b, SECRET).await.unwrap();
        leg_b.expire();

        let outcome = run_follower(&leg_a, &leg_b, fast(), &Shutdown::never())
            .await
            .unwrap();
        assert!(matches!(outcome, SwapOutcome::Redeemed { .. }));
        assert!(leg_b.state.lock().unwrap().refunded.is_none());
        assert!(leg_a.state.lock().unwrap().redeemed.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_follower() {
        let leg_a = FakeLeg::new("a");
        let leg_b = FakeLeg::new("b");
        let (handle, shutdown) = crate::shutdown::channel();
        handle.trigger();

        let err = run_follower(&leg_a, &leg_b, fast(), &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err.source, SwapperError::Cancelled));
    }
}
