//! Error types for the swapper
//!
//! Every watcher-side failure is a [`WatcherError`]: a [`SwapperError`] tagged
//! with the [`Disposition`] that decides whether the owning loop retries,
//! skips the record, or halts.

use crate::model::Chain;

use std::fmt;
use thiserror::Error;

/// Main error type for the swapper
#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain RPC error on {chain}: {message}")]
    ChainRpc { chain: Chain, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Counterparty mismatch for {identifier}: {message}")]
    CounterpartyMismatch { identifier: String, message: String },

    #[error("Blacklisted counterparty on {chain}: {addresses:?}")]
    Blacklisted { chain: Chain, addresses: Vec<String> },

    #[error("Screener error: {0}")]
    Screener(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Chain {0} is not configured")]
    ChainNotFound(Chain),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Order {0} failed hard: one leg redeemed, the other refunded")]
    FailedHard(i64),

    #[error("Insufficient balance on {chain}: have {have}, need {need}")]
    InsufficientBalance {
        chain: Chain,
        have: String,
        need: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwapperError {
    pub fn rpc(chain: Chain, err: impl fmt::Display) -> Self {
        SwapperError::ChainRpc {
            chain,
            message: err.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwapperError::ChainRpc { .. }
                | SwapperError::Timeout { .. }
                | SwapperError::Http(_)
                | SwapperError::Database(_)
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            SwapperError::InsufficientBalance { .. }
                | SwapperError::Contract(_)
                | SwapperError::Wallet(_)
                | SwapperError::FailedHard(_)
        )
    }

    /// Default disposition of this error when no stronger classification
    /// was attached where it was produced.
    pub fn disposition(&self) -> Disposition {
        match self {
            SwapperError::ChainRpc { .. }
            | SwapperError::Database(_)
            | SwapperError::Transaction(_)
            | SwapperError::GasEstimation(_)
            | SwapperError::Screener(_)
            | SwapperError::Timeout { .. }
            | SwapperError::Cancelled
            | SwapperError::InsufficientBalance { .. }
            | SwapperError::Http(_) => Disposition::Recoverable,

            SwapperError::Validation(_)
            | SwapperError::CounterpartyMismatch { .. }
            | SwapperError::Blacklisted { .. }
            | SwapperError::EventParsing(_)
            | SwapperError::NotFound { .. } => Disposition::Ignorable,

            SwapperError::Config(_)
            | SwapperError::Contract(_)
            | SwapperError::Wallet(_)
            | SwapperError::ChainNotFound(_)
            | SwapperError::InvalidStateTransition { .. }
            | SwapperError::FailedHard(_)
            | SwapperError::Internal(_) => Disposition::NonRecoverable,
        }
    }
}

/// Result type for swapper operations
pub type SwapperResult<T> = Result<T, SwapperError>;

/// What the owning loop does with a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Leave state untouched and try again on the next tick or call.
    Recoverable,
    /// Treat the record as a no-op and move on to the next one.
    Ignorable,
    /// Halt the owning loop.
    NonRecoverable,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Recoverable => "recoverable",
            Disposition::Ignorable => "ignorable",
            Disposition::NonRecoverable => "non_recoverable",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure from a watcher, protocol role or scheduler step.
#[derive(Error, Debug)]
#[error("{disposition} error: {source}")]
pub struct WatcherError {
    pub disposition: Disposition,
    #[source]
    pub source: SwapperError,
}

impl WatcherError {
    pub fn recoverable(source: SwapperError) -> Self {
        Self {
            disposition: Disposition::Recoverable,
            source,
        }
    }

    pub fn ignorable(source: SwapperError) -> Self {
        Self {
            disposition: Disposition::Ignorable,
            source,
        }
    }

    pub fn non_recoverable(source: SwapperError) -> Self {
        Self {
            disposition: Disposition::NonRecoverable,
            source,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.disposition == Disposition::Recoverable
    }

    pub fn is_ignorable(&self) -> bool {
        self.disposition == Disposition::Ignorable
    }

    pub fn is_non_recoverable(&self) -> bool {
        self.disposition == Disposition::NonRecoverable
    }
}

impl From<SwapperError> for WatcherError {
    fn from(source: SwapperError) -> Self {
        Self {
            disposition: source.disposition(),
            source,
        }
    }
}

/// Result type for watcher operations
pub type WatcherResult<T> = Result<T, WatcherError>;
