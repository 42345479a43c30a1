//! Transaction submission for account chains with gas optimization

mod gas;
mod sender;

pub use gas::GasEstimator;
pub use sender::TransactionSender;
