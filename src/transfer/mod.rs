//! Transfer module
//!
//! The money-transfer protocol and the lock ordering it depends on.

mod engine;
pub mod ordering;

pub use engine::TransferEngine;
pub use ordering::{lock_order, BalanceDelta, Role};
