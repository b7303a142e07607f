//! Common test utilities
#![allow(dead_code)]

pub mod cases;

use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use transfer_ledger::domain::CreateAccountParams;
use transfer_ledger::store::{MemoryStore, PgStore, Queries, Store};
use transfer_ledger::{Account, Entry, Transfer, TransferEngine};

const CURRENCIES: [&str; 3] = ["USD", "EUR", "CAD"];

pub fn random_owner() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect()
}

pub fn random_money() -> i64 {
    rand::thread_rng().gen_range(0..=1000)
}

pub fn random_currency() -> String {
    CURRENCIES[rand::thread_rng().gen_range(0..CURRENCIES.len())].to_string()
}

/// Engine over a fresh in-process store
pub fn memory_engine() -> Arc<TransferEngine<MemoryStore>> {
    Arc::new(TransferEngine::new(Arc::new(
        MemoryStore::new().with_lock_wait_timeout(Duration::from_secs(2)),
    )))
}

/// Setup test database - apply the schema and return a pool
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for PostgreSQL tests");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    pool.execute(transfer_ledger::db::SCHEMA)
        .await
        .expect("Failed to apply schema");

    pool
}

pub async fn pg_engine() -> Arc<TransferEngine<PgStore>> {
    let pool = setup_test_db().await;
    Arc::new(TransferEngine::new(Arc::new(PgStore::new(pool))))
}

/// Commit a new account with the given balance
pub async fn create_account<S>(engine: &TransferEngine<S>, balance: i64) -> Account
where
    S: Store,
    S::Tx: Queries,
{
    let params = CreateAccountParams::new(random_owner(), balance, random_currency());
    engine
        .coordinator()
        .run_in_transaction(move |q| q.create_account(params))
        .await
        .expect("Failed to create account")
}

pub async fn get_account<S>(engine: &TransferEngine<S>, id: i64) -> Account
where
    S: Store,
    S::Tx: Queries,
{
    engine
        .coordinator()
        .run_in_transaction(move |q| q.get_account(id))
        .await
        .expect("Failed to load account")
}

pub async fn get_entry<S>(engine: &TransferEngine<S>, id: i64) -> Entry
where
    S: Store,
    S::Tx: Queries,
{
    engine
        .coordinator()
        .run_in_transaction(move |q| q.get_entry(id))
        .await
        .expect("Failed to load entry")
}

pub async fn get_transfer<S>(engine: &TransferEngine<S>, id: i64) -> Transfer
where
    S: Store,
    S::Tx: Queries,
{
    engine
        .coordinator()
        .run_in_transaction(move |q| q.get_transfer(id))
        .await
        .expect("Failed to load transfer")
}
