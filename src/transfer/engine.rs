//! Transfer Engine
//!
//! Moves an amount between two accounts as one atomic, deadlock-free
//! transaction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::coordinator::TxCoordinator;
use crate::domain::{
    Account, CreateEntryParams, CreateTransferParams, TransferTxParams, TransferTxResult,
};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{Queries, Store};

use super::ordering::{lock_order, Role};

/// Executes money transfers through a [`TxCoordinator`]
pub struct TransferEngine<S> {
    coordinator: TxCoordinator<S>,
    tx_timeout: Option<Duration>,
}

impl<S> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            tx_timeout: self.tx_timeout,
        }
    }
}

impl<S> TransferEngine<S>
where
    S: Store,
    S::Tx: Queries,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            coordinator: TxCoordinator::new(store),
            tx_timeout: None,
        }
    }

    /// Cancel any transfer still running after `timeout`
    pub fn with_tx_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tx_timeout = timeout;
        self
    }

    pub fn coordinator(&self) -> &TxCoordinator<S> {
        &self.coordinator
    }

    /// Transfer `arg.amount` from one account to the other.
    ///
    /// Creates the transfer record, a debit and a credit entry, and updates
    /// both balances in a single transaction. On error nothing is persisted.
    pub async fn transfer(&self, arg: TransferTxParams) -> LedgerResult<TransferTxResult> {
        let timeout = self.tx_timeout;
        let deadline = async move {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        self.transfer_until(arg, deadline).await
    }

    /// Transfer, rolling back with `Cancelled` if `cancel` resolves first
    pub async fn transfer_until<C>(
        &self,
        arg: TransferTxParams,
        cancel: C,
    ) -> LedgerResult<TransferTxResult>
    where
        C: Future<Output = ()> + Send,
    {
        if arg.amount <= 0 {
            return Err(LedgerError::InvalidAmount(arg.amount));
        }

        tracing::debug!(
            from_account_id = arg.from_account_id,
            to_account_id = arg.to_account_id,
            amount = arg.amount,
            "Starting transfer"
        );

        let result = self
            .coordinator
            .run_until(cancel, move |q| Box::pin(execute_transfer(q, arg)))
            .await;

        match &result {
            Ok(committed) => tracing::debug!(
                transfer_id = committed.transfer.id,
                from_balance = committed.from_account.balance,
                to_balance = committed.to_account.balance,
                "Transfer committed"
            ),
            Err(e) => tracing::warn!(
                from_account_id = arg.from_account_id,
                to_account_id = arg.to_account_id,
                amount = arg.amount,
                error = %e,
                "Transfer aborted"
            ),
        }

        result
    }
}

/// The transfer protocol, run on a transaction-scoped executor
async fn execute_transfer<Q: Queries>(
    q: &mut Q,
    arg: TransferTxParams,
) -> LedgerResult<TransferTxResult> {
    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: arg.from_account_id,
            to_account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.from_account_id,
            amount: -arg.amount,
        })
        .await?;

    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: arg.to_account_id,
            amount: arg.amount,
        })
        .await?;

    let (from_account, to_account) = apply_balance_deltas(q, &arg).await?;

    Ok(TransferTxResult {
        transfer,
        from_entry,
        to_entry,
        from_account,
        to_account,
    })
}

/// Apply both balance deltas in lock order and return (from, to) accounts
async fn apply_balance_deltas<Q: Queries>(
    q: &mut Q,
    arg: &TransferTxParams,
) -> LedgerResult<(Account, Account)> {
    let [first, second] = lock_order(arg);

    let first_account = q.add_account_balance(first.into()).await?;
    let second_account = q.add_account_balance(second.into()).await?;

    // Same row on both sides: only the second update is the final state.
    if first.account_id == second.account_id {
        return Ok((second_account.clone(), second_account));
    }

    Ok(match first.role {
        Role::Source => (first_account, second_account),
        Role::Destination => (second_account, first_account),
    })
}
