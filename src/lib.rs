//! HTLC Swapper - cross-chain atomic swap watcher
//!
//! Watches hash-time-locked contracts on UTXO and account chains, advances
//! each swap leg from on-chain evidence, and composes order outcomes from
//! their two legs.

pub mod alert;
pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod screener;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod swap;
pub mod tx;
