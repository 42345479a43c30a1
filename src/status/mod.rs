//! Status state machines
//!
//! - [`update_swap_status`]: one leg, reconciled from chain evidence
//! - [`process_order`]: the order outcome, composed from its two legs

pub mod order;
pub mod swap;

pub use order::{process_order, OrderTimeouts, OrderUpdate};
pub use swap::{update_swap_status, SwapUpdate};
