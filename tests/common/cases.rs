//! Transfer scenarios shared by the in-process and PostgreSQL suites

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use transfer_ledger::domain::{AddAccountBalanceParams, ListParams};
use transfer_ledger::store::{Queries, Store, StoreTransaction};
use transfer_ledger::{LedgerError, TransferEngine, TransferTxParams};

use super::{create_account, get_account, get_entry, get_transfer};

/// Transfer(X{100}, Y{50}, 30) leaves X at 70 and Y at 80
pub async fn basic_transfer<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;
    let y = create_account(&engine, 50).await;

    let result = engine
        .transfer(TransferTxParams::new(x.id, y.id, 30))
        .await
        .unwrap();

    assert_eq!(result.transfer.from_account_id, x.id);
    assert_eq!(result.transfer.to_account_id, y.id);
    assert_eq!(result.transfer.amount, 30);

    assert_eq!(result.from_entry.account_id, x.id);
    assert_eq!(result.from_entry.amount, -30);
    assert_eq!(result.to_entry.account_id, y.id);
    assert_eq!(result.to_entry.amount, 30);

    assert_eq!(result.from_account.id, x.id);
    assert_eq!(result.from_account.balance, 70);
    assert_eq!(result.to_account.id, y.id);
    assert_eq!(result.to_account.balance, 80);

    // Conservation
    assert_eq!(
        result.from_account.balance + result.to_account.balance,
        x.balance + y.balance
    );
}

/// The result bundle matches what was committed
pub async fn result_matches_stored_rows<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 500).await;
    let y = create_account(&engine, 500).await;

    // Higher id as source exercises the reversed lock order.
    let result = engine
        .transfer(TransferTxParams::new(y.id, x.id, 125))
        .await
        .unwrap();

    assert_eq!(get_transfer(&engine, result.transfer.id).await, result.transfer);
    assert_eq!(get_entry(&engine, result.from_entry.id).await, result.from_entry);
    assert_eq!(get_entry(&engine, result.to_entry.id).await, result.to_entry);

    assert_eq!(get_account(&engine, y.id).await.balance, 375);
    assert_eq!(get_account(&engine, x.id).await.balance, 625);
    assert_eq!(result.from_account.balance, 375);
    assert_eq!(result.to_account.balance, 625);
}

/// A failing step leaves no transfer, entry or balance change behind
pub async fn missing_destination_is_atomic<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;
    let missing = x.id + 1_000_000;

    let err = engine
        .transfer(TransferTxParams::new(x.id, missing, 10))
        .await
        .unwrap_err();
    assert!(
        matches!(err, LedgerError::ConstraintViolation(_)),
        "Expected ConstraintViolation, got: {:?}",
        err
    );

    let x_id = x.id;
    let (account, entries, transfers) = engine
        .coordinator()
        .run_in_transaction(move |q| {
            Box::pin(async move {
                let account = q.get_account(x_id).await?;
                let entries = q.list_entries(x_id, ListParams::default()).await?;
                let transfers = q.list_transfers(x_id, ListParams::default()).await?;
                Ok((account, entries, transfers))
            })
        })
        .await
        .unwrap();

    assert_eq!(account.balance, 100);
    assert!(entries.is_empty());
    assert!(transfers.is_empty());
}

/// Non-positive amounts are refused before any transaction opens
pub async fn non_positive_amount_is_rejected<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;
    let y = create_account(&engine, 100).await;

    for amount in [0, -10] {
        let err = engine
            .transfer(TransferTxParams::new(x.id, y.id, amount))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(a) if a == amount));
    }

    assert_eq!(get_account(&engine, x.id).await.balance, 100);
}

/// Five concurrent X -> Y transfers of 10 serialize on the row locks
pub async fn concurrent_same_direction<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;
    let y = create_account(&engine, 50).await;

    let n = 5;
    let amount = 10;

    let handles: Vec<_> = (0..n)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let params = TransferTxParams::new(x.id, y.id, amount);
            tokio::spawn(async move { engine.transfer(params).await })
        })
        .collect();

    let mut seen = HashSet::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();

        assert_eq!(result.transfer.from_account_id, x.id);
        assert_eq!(result.transfer.to_account_id, y.id);
        assert_eq!(result.transfer.amount, amount);
        assert_eq!(result.from_entry.amount, -amount);
        assert_eq!(result.to_entry.amount, amount);

        let diff_from = x.balance - result.from_account.balance;
        let diff_to = result.to_account.balance - y.balance;
        assert_eq!(diff_from, diff_to);
        assert!(diff_from > 0);
        assert_eq!(diff_from % amount, 0);

        let k = diff_from / amount;
        assert!((1..=n).contains(&k), "unexpected step {}", k);
        assert!(seen.insert(k), "two transfers saw step {}", k);
    }

    assert_eq!(get_account(&engine, x.id).await.balance, 50);
    assert_eq!(get_account(&engine, y.id).await.balance, 100);

    // Entry pairing: one debit on X and one credit on Y per transfer
    let (x_id, y_id) = (x.id, y.id);
    let (x_entries, y_entries, transfers) = engine
        .coordinator()
        .run_in_transaction(move |q| {
            Box::pin(async move {
                let x_entries = q.list_entries(x_id, ListParams::default()).await?;
                let y_entries = q.list_entries(y_id, ListParams::default()).await?;
                let transfers = q.list_transfers(x_id, ListParams::default()).await?;
                Ok((x_entries, y_entries, transfers))
            })
        })
        .await
        .unwrap();

    assert_eq!(transfers.len(), n as usize);
    assert_eq!(x_entries.len(), n as usize);
    assert_eq!(y_entries.len(), n as usize);
    assert!(x_entries.iter().all(|e| e.amount == -amount));
    assert!(y_entries.iter().all(|e| e.amount == amount));
}

/// Ten concurrent transfers alternating direction never deadlock
pub async fn concurrent_opposing_directions<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;
    let y = create_account(&engine, 50).await;

    let n = 10;
    let amount = 10;

    let handles: Vec<_> = (0..n)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let params = if i % 2 == 1 {
                TransferTxParams::new(x.id, y.id, amount)
            } else {
                TransferTxParams::new(y.id, x.id, amount)
            };
            tokio::spawn(async move { engine.transfer(params).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(result.is_ok(), "transfer failed: {:?}", result.err());
    }

    assert_eq!(get_account(&engine, x.id).await.balance, x.balance);
    assert_eq!(get_account(&engine, y.id).await.balance, y.balance);
}

/// Assert the pair still holds its opening balances and has no ledger rows
async fn assert_untouched<S>(engine: &TransferEngine<S>, x: (i64, i64), y: (i64, i64))
where
    S: Store,
    S::Tx: Queries,
{
    let ((x_id, x_balance), (y_id, y_balance)) = (x, y);
    let (x_after, y_after, entries, transfers) = engine
        .coordinator()
        .run_in_transaction(move |q| {
            Box::pin(async move {
                let mut entries = q.list_entries(x_id, ListParams::default()).await?;
                entries.extend(q.list_entries(y_id, ListParams::default()).await?);
                Ok((
                    q.get_account(x_id).await?,
                    q.get_account(y_id).await?,
                    entries,
                    q.list_transfers(x_id, ListParams::default()).await?,
                ))
            })
        })
        .await
        .unwrap();

    assert_eq!(x_after.balance, x_balance);
    assert_eq!(y_after.balance, y_balance);
    assert!(entries.is_empty(), "unexpected entries: {:?}", entries);
    assert!(transfers.is_empty(), "unexpected transfers: {:?}", transfers);
}

/// A transfer stuck behind another transaction's row locks gives up at its
/// timeout, while those locks are still held, and persists nothing
pub async fn timeout_leaves_no_trace<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;
    let y = create_account(&engine, 50).await;
    let timed = (*engine)
        .clone()
        .with_tx_timeout(Some(Duration::from_millis(100)));

    // Holds both rows until after the transfer has returned.
    let mut holder = engine.coordinator().store().begin().await.unwrap();
    for id in [x.id, y.id] {
        holder
            .add_account_balance(AddAccountBalanceParams { id, amount: 0 })
            .await
            .unwrap();
    }

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        timed.transfer(TransferTxParams::new(x.id, y.id, 10)),
    )
    .await
    .expect("transfer did not return while the rows were locked");
    let elapsed = started.elapsed();

    assert!(
        matches!(result, Err(LedgerError::Cancelled)),
        "Expected Cancelled, got: {:?}",
        result
    );
    assert!(elapsed < Duration::from_secs(2), "timeout took {:?}", elapsed);

    holder.rollback().await.unwrap();
    assert_untouched(&engine, (x.id, 100), (y.id, 50)).await;
}

/// Caller cancellation of a blocked transfer rolls it back promptly
pub async fn caller_cancellation_rolls_back<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;
    let y = create_account(&engine, 50).await;

    let mut holder = engine.coordinator().store().begin().await.unwrap();
    holder
        .add_account_balance(AddAccountBalanceParams { id: x.id, amount: 0 })
        .await
        .unwrap();

    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
    let pending = engine.transfer_until(TransferTxParams::new(x.id, y.id, 10), async move {
        let _ = cancel_rx.await;
    });

    let (result, ()) = tokio::join!(
        tokio::time::timeout(Duration::from_secs(10), pending),
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = cancel_tx.send(());
        }
    );
    let result = result.expect("cancelled transfer did not return while the row was locked");

    assert!(
        matches!(result, Err(LedgerError::Cancelled)),
        "Expected Cancelled, got: {:?}",
        result
    );

    holder.rollback().await.unwrap();
    assert_untouched(&engine, (x.id, 100), (y.id, 50)).await;
}

/// A self-transfer nets to zero and reports the committed row on both sides
pub async fn self_transfer_reports_final_balance<S>(engine: Arc<TransferEngine<S>>)
where
    S: Store,
    S::Tx: Queries,
{
    let x = create_account(&engine, 100).await;

    let result = engine
        .transfer(TransferTxParams::new(x.id, x.id, 10))
        .await
        .unwrap();

    assert_eq!(result.from_account.balance, 100);
    assert_eq!(result.to_account, result.from_account);
    assert_eq!(get_account(&engine, x.id).await, result.to_account);
    assert_eq!(result.from_entry.amount + result.to_entry.amount, 0);
}
