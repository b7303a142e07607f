//! transfer_ledger Library
//!
//! Account ledger with atomic, deadlock-free transfers.
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod domain;
mod error;
pub mod store;
pub mod transfer;

pub use config::Config;
pub use coordinator::TxCoordinator;
pub use domain::{Account, Entry, Transfer, TransferTxParams, TransferTxResult};
pub use error::{LedgerError, LedgerResult};
pub use transfer::TransferEngine;
