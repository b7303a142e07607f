//! Domain module
//!
//! Ledger rows and the parameters of the operations that produce them.

pub mod models;

pub use models::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListParams, Transfer, TransferTxParams, TransferTxResult,
};
