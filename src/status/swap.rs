//! Per-leg status reconciliation
//!
//! Advances one leg by at most one step of
//! `NotStarted -> Detected -> Initiated -> {Redeemed | Expired}` and
//! `Expired -> {Redeemed | Refunded}` per call, from what its watcher sees.

use crate::chain::confirmations::{clamp_confirmations, effective_minimum};
use crate::error::WatcherResult;
use crate::model::{AtomicSwap, SwapStatus};
use crate::swap::Watcher;

use tracing::{debug, info};

/// Result of reconciling one leg
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapUpdate {
    /// Nothing observable changed; no write needed
    Unchanged,
    Changed(AtomicSwap),
}

/// Reconcile `swap` against the chain through `watcher`.
///
/// A redeem observed alongside expiry wins: the leg becomes `Redeemed`.
pub async fn update_swap_status(
    swap: &AtomicSwap,
    watcher: &dyn Watcher,
) -> WatcherResult<SwapUpdate> {
    let mut next = swap.clone();

    match swap.status {
        SwapStatus::NotStarted | SwapStatus::Detected => {
            apply_initiate_status(&mut next, watcher).await?;
        }
        SwapStatus::Initiated => {
            if !apply_redeem(&mut next, watcher).await? && watcher.expired().await? {
                info!("{} on {} expired", watcher.identifier(), swap.chain);
                next.status = SwapStatus::Expired;
            }
        }
        SwapStatus::Expired => {
            if !apply_redeem(&mut next, watcher).await? {
                if let Some(tx_hash) = watcher.is_refunded().await? {
                    info!("{} on {} refunded in {}", watcher.identifier(), swap.chain, tx_hash);
                    next.refund_tx_hash = tx_hash;
                    next.status = SwapStatus::Refunded;
                }
            }
        }
        SwapStatus::Redeemed | SwapStatus::Refunded => return Ok(SwapUpdate::Unchanged),
    }

    if next == *swap {
        Ok(SwapUpdate::Unchanged)
    } else {
        Ok(SwapUpdate::Changed(next))
    }
}

async fn apply_initiate_status(swap: &mut AtomicSwap, watcher: &dyn Watcher) -> WatcherResult<()> {
    let status = watcher.initiate_status().await?;
    let minimum = effective_minimum(swap.chain, swap.minimum_confirmations);

    if swap.on_chain_identifier.is_empty() {
        swap.on_chain_identifier = watcher.identifier();
    }
    if status.filled_amount > 0 {
        swap.filled_amount = status.filled_amount.to_string();
    }
    if !status.detected {
        return Ok(());
    }

    swap.initiate_tx_hash = status.tx_hash;
    swap.current_confirmations = clamp_confirmations(status.confirmations, minimum);
    if status.initiated {
        swap.initiate_block_number = status.block_number;
        swap.status = SwapStatus::Initiated;
        info!(
            "{} on {} initiated at block {} in {}",
            swap.on_chain_identifier, swap.chain, status.block_number, swap.initiate_tx_hash
        );
    } else {
        swap.status = SwapStatus::Detected;
        debug!(
            "{} on {} detected with {}/{} confirmations",
            swap.on_chain_identifier, swap.chain, swap.current_confirmations, minimum
        );
    }
    Ok(())
}

/// Record a redeem if one is visible; returns whether it was
async fn apply_redeem(swap: &mut AtomicSwap, watcher: &dyn Watcher) -> WatcherResult<bool> {
    match watcher.is_redeemed().await? {
        Some(redemption) => {
            info!(
                "{} on {} redeemed in {}",
                swap.on_chain_identifier, swap.chain, redemption.tx_hash
            );
            swap.secret = hex::encode(&redemption.secret);
            swap.redeem_tx_hash = redemption.tx_hash;
            swap.status = SwapStatus::Redeemed;
            Ok(true)
        }
        None => Ok(false),
    }
}
