//! PostgreSQL store
//!
//! Every query runs on the connection owned by one `sqlx` transaction.
//! Row locks come from `UPDATE ... RETURNING` and are held until commit.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{
    Account, AddAccountBalanceParams, CreateAccountParams, CreateEntryParams,
    CreateTransferParams, Entry, ListParams, Transfer,
};
use crate::error::{LedgerError, LedgerResult};

use super::{Queries, Store, StoreTransaction};

/// PostgreSQL-backed store
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PgStore over an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> LedgerResult<PgTx> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(LedgerError::store_unavailable)?;

        let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await
            .map_err(LedgerError::store_unavailable)?;

        Ok(PgTx {
            tx,
            pool: self.pool.clone(),
            backend_pid,
        })
    }
}

/// An open PostgreSQL transaction.
///
/// Dropped without `commit`, `sqlx` rolls it back when the connection
/// returns to the pool.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
    /// Used to cancel this transaction's running statement from another connection
    pool: PgPool,
    backend_pid: i32,
}

#[async_trait]
impl StoreTransaction for PgTx {
    async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn abort(mut self) -> LedgerResult<()> {
        // The dropped statement keeps running server-side (a lock wait can
        // last as long as the holder). Cancel it so ROLLBACK is not queued
        // behind it. A request that arrives while the backend is idle is ignored.
        let cancelled = sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
            .bind(self.backend_pid)
            .fetch_one(&self.pool)
            .await;

        match cancelled {
            Ok(signalled) => tracing::debug!(
                backend_pid = self.backend_pid,
                signalled,
                "Cancelled in-flight statement"
            ),
            Err(e) => tracing::warn!(
                backend_pid = self.backend_pid,
                error = %e,
                "Could not cancel in-flight statement"
            ),
        }

        // The connection reports the cancelled statement's error on its next
        // use. Collect it here so ROLLBACK starts from a ready connection.
        if let Err(e) = sqlx::query("SELECT 1").execute(&mut *self.tx).await {
            tracing::debug!(error = %e, "Collected aborted statement result");
        }

        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl Queries for PgTx {
    async fn create_account(&mut self, arg: CreateAccountParams) -> LedgerResult<Account> {
        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(&arg.owner)
        .bind(arg.balance)
        .bind(&arg.currency)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, id: i64) -> LedgerResult<Account> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", id))
    }

    async fn list_accounts(&mut self, page: ListParams) -> LedgerResult<Vec<Account>> {
        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT id, owner, balance, currency, created_at
            FROM accounts
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(accounts)
    }

    async fn add_account_balance(
        &mut self,
        arg: AddAccountBalanceParams,
    ) -> LedgerResult<Account> {
        sqlx::query_as::<_, Account>(
            r#"
            UPDATE accounts
            SET balance = balance + $1
            WHERE id = $2
            RETURNING id, owner, balance, currency, created_at
            "#,
        )
        .bind(arg.amount)
        .bind(arg.id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", arg.id))
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> LedgerResult<Entry> {
        let entry = sqlx::query_as::<_, Entry>(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(arg.account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> LedgerResult<Entry> {
        sqlx::query_as::<_, Entry>(
            "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("entry", id))
    }

    async fn list_entries(
        &mut self,
        account_id: i64,
        page: ListParams,
    ) -> LedgerResult<Vec<Entry>> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(entries)
    }

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> LedgerResult<Transfer> {
        let transfer = sqlx::query_as::<_, Transfer>(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(arg.from_account_id)
        .bind(arg.to_account_id)
        .bind(arg.amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> LedgerResult<Transfer> {
        sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| LedgerError::not_found("transfer", id))
    }

    async fn list_transfers(
        &mut self,
        account_id: i64,
        page: ListParams,
    ) -> LedgerResult<Vec<Transfer>> {
        let transfers = sqlx::query_as::<_, Transfer>(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(transfers)
    }
}
