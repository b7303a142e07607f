//! In-process store
//!
//! Behaves like a row-locking database for the ledger tables:
//! - writes are buffered in the transaction and published on commit
//! - `add_account_balance` takes a per-account lock held until the
//!   transaction finishes
//! - waiting on a row lock longer than the lock-wait timeout fails with
//!   `CommitConflict`, the way PostgreSQL reports lock timeouts and deadlocks
//!
//! Ids come from sequences that are not rolled back, so aborted transactions
//! leave gaps.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListParams, Transfer,
};
use crate::error::{LedgerError, LedgerResult};

use super::{Queries, Store, StoreTransaction};

const DEFAULT_LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<i64, Account>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
    row_locks: HashMap<i64, Arc<Mutex<()>>>,
    account_seq: i64,
    entry_seq: i64,
    transfer_seq: i64,
}

fn next_id(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

fn page<T>(rows: impl Iterator<Item = T>, page: ListParams) -> Vec<T> {
    rows.skip(page.offset.max(0) as usize)
        .take(page.limit.max(0) as usize)
        .collect()
}

/// In-process ledger store. Clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    closed: Arc<AtomicBool>,
    lock_wait_timeout: Duration,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            closed: Arc::new(AtomicBool::new(false)),
            lock_wait_timeout: DEFAULT_LOCK_WAIT_TIMEOUT,
        }
    }

    /// Set how long `add_account_balance` may wait for a row lock
    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = timeout;
        self
    }

    /// Refuse new transactions. Open ones can still finish.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> LedgerResult<MemoryTx> {
        if self.is_closed() {
            return Err(LedgerError::StoreUnavailable(
                "memory store is closed".to_string(),
            ));
        }

        Ok(MemoryTx {
            tables: Arc::clone(&self.tables),
            lock_wait_timeout: self.lock_wait_timeout,
            held: BTreeMap::new(),
            balances: BTreeMap::new(),
            accounts: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        })
    }
}

/// An open in-process transaction.
///
/// Dropping it unfinished discards its writes and releases its row locks.
pub struct MemoryTx {
    tables: Arc<Mutex<Tables>>,
    lock_wait_timeout: Duration,
    /// Row locks taken by `add_account_balance`
    held: BTreeMap<i64, OwnedMutexGuard<()>>,
    /// Post-update balances of locked, previously committed accounts
    balances: BTreeMap<i64, i64>,
    accounts: BTreeMap<i64, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryTx {
    fn has_account(&self, tables: &Tables, id: i64) -> bool {
        self.accounts.contains_key(&id) || tables.accounts.contains_key(&id)
    }

    /// The account as this transaction sees it
    fn visible_account(&self, tables: &Tables, id: i64) -> Option<Account> {
        if let Some(account) = self.accounts.get(&id) {
            return Some(account.clone());
        }

        let mut account = tables.accounts.get(&id).cloned()?;
        if let Some(balance) = self.balances.get(&id) {
            account.balance = *balance;
        }
        Some(account)
    }

    async fn lock_row(&mut self, id: i64) -> LedgerResult<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }

        let lock = self
            .tables
            .lock()
            .await
            .row_locks
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("account", id))?;

        let guard = tokio::time::timeout(self.lock_wait_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                LedgerError::CommitConflict(format!("lock wait timeout on account {}", id))
            })?;

        self.held.insert(id, guard);
        Ok(())
    }
}

fn add_balance(balance: i64, delta: i64) -> LedgerResult<i64> {
    balance
        .checked_add(delta)
        .ok_or_else(|| LedgerError::ConstraintViolation("bigint out of range".to_string()))
}

#[async_trait]
impl StoreTransaction for MemoryTx {
    async fn commit(self) -> LedgerResult<()> {
        let MemoryTx {
            tables,
            held,
            balances,
            accounts,
            entries,
            transfers,
            ..
        } = self;

        let mut tables = tables.lock().await;
        for (id, account) in accounts {
            tables.row_locks.insert(id, Arc::new(Mutex::new(())));
            tables.accounts.insert(id, account);
        }
        for (id, balance) in balances {
            if let Some(account) = tables.accounts.get_mut(&id) {
                account.balance = balance;
            }
        }
        for entry in entries {
            tables.entries.insert(entry.id, entry);
        }
        for transfer in transfers {
            tables.transfers.insert(transfer.id, transfer);
        }
        drop(tables);

        // Waiters only see the row after the writes above are published.
        drop(held);
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        tracing::debug!(
            locked_rows = self.held.len(),
            "Discarding in-memory transaction"
        );
        Ok(())
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_account(&mut self, arg: CreateAccountParams) -> LedgerResult<Account> {
        let id = next_id(&mut self.tables.lock().await.account_seq);

        let account = Account {
            id,
            owner: arg.owner,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        self.accounts.insert(id, account.clone());

        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> LedgerResult<Account> {
        let shared = Arc::clone(&self.tables);
        let tables = shared.lock().await;

        self.visible_account(&tables, id)
            .ok_or_else(|| LedgerError::not_found("account", id))
    }

    async fn list_accounts(&mut self, list: ListParams) -> LedgerResult<Vec<Account>> {
        let shared = Arc::clone(&self.tables);
        let tables = shared.lock().await;

        let ids: Vec<i64> = tables
            .accounts
            .keys()
            .chain(self.accounts.keys())
            .copied()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(page(
            ids.into_iter()
                .filter_map(|id| self.visible_account(&tables, id)),
            list,
        ))
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> LedgerResult<Account> {
        // Rows created by this transaction are invisible to others, no lock needed.
        if let Some(account) = self.accounts.get_mut(&arg.id) {
            account.balance = add_balance(account.balance, arg.amount)?;
            return Ok(account.clone());
        }

        self.lock_row(arg.id).await?;

        let shared = Arc::clone(&self.tables);
        let tables = shared.lock().await;

        let mut account = self
            .visible_account(&tables, arg.id)
            .ok_or_else(|| LedgerError::not_found("account", arg.id))?;
        account.balance = add_balance(account.balance, arg.amount)?;
        self.balances.insert(arg.id, account.balance);

        Ok(account)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> LedgerResult<Entry> {
        let shared = Arc::clone(&self.tables);
        let mut tables = shared.lock().await;

        if !self.has_account(&tables, arg.account_id) {
            return Err(LedgerError::ConstraintViolation(format!(
                "entries_account_id_fkey: account {} does not exist",
                arg.account_id
            )));
        }

        let entry = Entry {
            id: next_id(&mut tables.entry_seq),
            account_id: arg.account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());

        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> LedgerResult<Entry> {
        if let Some(entry) = self.entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }

        self.tables
            .lock()
            .await
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    async fn list_entries(
        &mut self,
        account_id: i64,
        list: ListParams,
    ) -> LedgerResult<Vec<Entry>> {
        let tables = self.tables.lock().await;

        let mut rows: Vec<Entry> = tables
            .entries
            .values()
            .chain(self.entries.iter())
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.id);

        Ok(page(rows.into_iter(), list))
    }

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> LedgerResult<Transfer> {
        let shared = Arc::clone(&self.tables);
        let mut tables = shared.lock().await;

        if arg.amount <= 0 {
            return Err(LedgerError::ConstraintViolation(format!(
                "transfers_amount_check: amount {} must be positive",
                arg.amount
            )));
        }
        for (column, id) in [
            ("from_account_id", arg.from_account_id),
            ("to_account_id", arg.to_account_id),
        ] {
            if !self.has_account(&tables, id) {
                return Err(LedgerError::ConstraintViolation(format!(
                    "transfers_{}_fkey: account {} does not exist",
                    column, id
                )));
            }
        }

        let transfer = Transfer {
            id: next_id(&mut tables.transfer_seq),
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> LedgerResult<Transfer> {
        if let Some(transfer) = self.transfers.iter().find(|t| t.id == id) {
            return Ok(transfer.clone());
        }

        self.tables
            .lock()
            .await
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("transfer", id))
    }

    async fn list_transfers(
        &mut self,
        account_id: i64,
        list: ListParams,
    ) -> LedgerResult<Vec<Transfer>> {
        let tables = self.tables.lock().await;

        let mut rows: Vec<Transfer> = tables
            .transfers
            .values()
            .chain(self.transfers.iter())
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.id);

        Ok(page(rows.into_iter(), list))
    }
}
