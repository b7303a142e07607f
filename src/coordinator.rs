//! Transaction Coordinator
//!
//! Runs a unit of work inside one store transaction: commit on success,
//! rollback on failure or cancellation.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::{LedgerError, LedgerResult};
use crate::store::{Store, StoreTransaction};

/// Executes units of work atomically against a [`Store`]
pub struct TxCoordinator<S> {
    store: Arc<S>,
}

impl<S> Clone for TxCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> TxCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `work` inside a single transaction.
    ///
    /// `work` gets the transaction-scoped executor. Nothing it does is visible
    /// elsewhere until the commit succeeds, and nothing persists if it fails.
    pub async fn run_in_transaction<T, F>(&self, work: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, LedgerResult<T>> + Send,
    {
        self.run_until(std::future::pending::<()>(), work).await
    }

    /// Like [`run_in_transaction`](Self::run_in_transaction), but abandons the
    /// work and returns `Cancelled` as soon as `cancel` resolves. The
    /// transaction is then ended with [`StoreTransaction::abort`], which also
    /// stops any statement the work left running.
    pub async fn run_until<T, F, C>(&self, cancel: C, work: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut S::Tx) -> BoxFuture<'t, LedgerResult<T>> + Send,
        C: Future<Output = ()> + Send,
    {
        let mut tx = self.store.begin().await?;

        let (outcome, abandoned) = {
            let work = work(&mut tx);
            tokio::select! {
                result = work => (result, false),
                () = cancel => (Err(LedgerError::Cancelled), true),
            }
        };

        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                // Abandoned work may have left a statement running in the store.
                let finished = if abandoned {
                    tx.abort().await
                } else {
                    tx.rollback().await
                };
                finish_failed(err, finished)
            }
        }
    }
}

/// Surface the work error, or both errors if ending the transaction also failed
fn finish_failed<T>(err: LedgerError, finished: LedgerResult<()>) -> LedgerResult<T> {
    match finished {
        Ok(()) => Err(err),
        Err(rollback_err) => {
            tracing::error!(
                error = %err,
                rollback_error = %rollback_err,
                "Rollback failed after aborted transaction"
            );
            Err(LedgerError::rollback_failed(err, rollback_err))
        }
    }
}
