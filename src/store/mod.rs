//! Store module
//!
//! The persistent-store contract the ledger is built on, and its two
//! implementations: PostgreSQL for production and an in-process store.
//!
//! A [`Store`] opens transactions. A [`StoreTransaction`] is finished exactly
//! once, by `commit`, `rollback` or `abort`; dropping it unfinished discards
//! its work.
//! Inside a transaction, [`Queries`] is the transaction-scoped query executor.

mod memory;
mod postgres;

use async_trait::async_trait;

use crate::domain::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListParams, Transfer,
};
use crate::error::LedgerResult;

pub use memory::{MemoryStore, MemoryTx};
pub use postgres::{PgStore, PgTx};

/// A store that can open transactions
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Begin a transaction. Fails with `StoreUnavailable` if none can be opened.
    async fn begin(&self) -> LedgerResult<Self::Tx>;
}

/// An open transaction
#[async_trait]
pub trait StoreTransaction: Send + Sized + 'static {
    async fn commit(self) -> LedgerResult<()>;

    async fn rollback(self) -> LedgerResult<()>;

    /// Roll back after the unit of work was dropped mid-statement.
    ///
    /// A statement already sent may still be running (for example waiting on
    /// a row lock). Implementations must stop it before rolling back so the
    /// abort is not bounded by other transactions.
    async fn abort(self) -> LedgerResult<()> {
        self.rollback().await
    }
}

/// Single-row operations executed inside one transaction
#[async_trait]
pub trait Queries: Send {
    async fn create_account(&mut self, arg: CreateAccountParams) -> LedgerResult<Account>;

    async fn get_account(&mut self, id: i64) -> LedgerResult<Account>;

    async fn list_accounts(&mut self, page: ListParams) -> LedgerResult<Vec<Account>>;

    /// Add a signed delta to an account balance and return the updated row.
    ///
    /// Takes the account's row lock, held until the transaction finishes.
    async fn add_account_balance(&mut self, arg: AddAccountBalanceParams)
        -> LedgerResult<Account>;

    async fn create_entry(&mut self, arg: CreateEntryParams) -> LedgerResult<Entry>;

    async fn get_entry(&mut self, id: i64) -> LedgerResult<Entry>;

    async fn list_entries(&mut self, account_id: i64, page: ListParams)
        -> LedgerResult<Vec<Entry>>;

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> LedgerResult<Transfer>;

    async fn get_transfer(&mut self, id: i64) -> LedgerResult<Transfer>;

    /// Transfers in which the account is either side
    async fn list_transfers(
        &mut self,
        account_id: i64,
        page: ListParams,
    ) -> LedgerResult<Vec<Transfer>>;
}
