//! API Routes
//!
//! HTTP endpoint definitions.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Account, CreateAccountParams, Entry, ListParams, Transfer, TransferTxParams,
    TransferTxResult,
};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{Queries, Store};
use crate::transfer::TransferEngine;

/// Shared router state
pub struct AppState<S> {
    pub engine: Arc<TransferEngine<S>>,
}

impl<S> AppState<S> {
    pub fn new(engine: TransferEngine<S>) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub owner: String,
    pub currency: String,
}

impl CreateAccountRequest {
    fn validate(&self) -> LedgerResult<()> {
        if self.owner.trim().is_empty() {
            return Err(LedgerError::InvalidRequest("owner must not be empty".to_string()));
        }
        let is_code = self.currency.len() == 3
            && self.currency.chars().all(|c| c.is_ascii_uppercase());
        if !is_code {
            return Err(LedgerError::InvalidRequest(format!(
                "currency must be a three-letter code, got '{}'",
                self.currency
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

const MAX_LIMIT: i64 = 100;

impl ListQuery {
    fn into_params(self) -> LedgerResult<ListParams> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(LedgerError::InvalidRequest(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }
        if self.offset < 0 {
            return Err(LedgerError::InvalidRequest("offset must not be negative".to_string()));
        }
        Ok(ListParams::new(self.limit, self.offset))
    }
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router<S>() -> Router<AppState<S>>
where
    S: Store,
    S::Tx: Queries,
{
    Router::new()
        .route("/accounts", post(create_account::<S>).get(list_accounts::<S>))
        .route("/accounts/:account_id", get(get_account::<S>))
        .route("/accounts/:account_id/entries", get(list_entries::<S>))
        .route("/accounts/:account_id/transfers", get(list_transfers::<S>))
        .route("/transfers", post(create_transfer::<S>))
        .route("/transfers/:transfer_id", get(get_transfer::<S>))
}

// =========================================================================
// Accounts
// =========================================================================

/// Open a new account with a zero balance
async fn create_account<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<CreateAccountRequest>,
) -> LedgerResult<(StatusCode, Json<Account>)>
where
    S: Store,
    S::Tx: Queries,
{
    request.validate()?;
    let params = CreateAccountParams::new(request.owner, 0, request.currency);

    let account = state
        .engine
        .coordinator()
        .run_in_transaction(move |q| q.create_account(params))
        .await?;

    tracing::info!(account_id = account.id, "Account created");
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account<S>(
    State(state): State<AppState<S>>,
    Path(account_id): Path<i64>,
) -> LedgerResult<Json<Account>>
where
    S: Store,
    S::Tx: Queries,
{
    let account = state
        .engine
        .coordinator()
        .run_in_transaction(move |q| q.get_account(account_id))
        .await?;

    Ok(Json(account))
}

async fn list_accounts<S>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListQuery>,
) -> LedgerResult<Json<Vec<Account>>>
where
    S: Store,
    S::Tx: Queries,
{
    let page = query.into_params()?;

    let accounts = state
        .engine
        .coordinator()
        .run_in_transaction(move |q| q.list_accounts(page))
        .await?;

    Ok(Json(accounts))
}

async fn list_entries<S>(
    State(state): State<AppState<S>>,
    Path(account_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> LedgerResult<Json<Vec<Entry>>>
where
    S: Store,
    S::Tx: Queries,
{
    let page = query.into_params()?;

    let entries = state
        .engine
        .coordinator()
        .run_in_transaction(move |q| q.list_entries(account_id, page))
        .await?;

    Ok(Json(entries))
}

async fn list_transfers<S>(
    State(state): State<AppState<S>>,
    Path(account_id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> LedgerResult<Json<Vec<Transfer>>>
where
    S: Store,
    S::Tx: Queries,
{
    let page = query.into_params()?;

    let transfers = state
        .engine
        .coordinator()
        .run_in_transaction(move |q| q.list_transfers(account_id, page))
        .await?;

    Ok(Json(transfers))
}

// =========================================================================
// Transfers
// =========================================================================

/// Move funds between two accounts
async fn create_transfer<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<TransferRequest>,
) -> LedgerResult<(StatusCode, Json<TransferTxResult>)>
where
    S: Store,
    S::Tx: Queries,
{
    if request.from_account_id == request.to_account_id {
        return Err(LedgerError::InvalidRequest(
            "Cannot transfer to the same account".to_string(),
        ));
    }

    let result = state
        .engine
        .transfer(TransferTxParams::new(
            request.from_account_id,
            request.to_account_id,
            request.amount,
        ))
        .await?;

    Ok((StatusCode::CREATED, Json(result)))
}

async fn get_transfer<S>(
    State(state): State<AppState<S>>,
    Path(transfer_id): Path<i64>,
) -> LedgerResult<Json<Transfer>>
where
    S: Store,
    S::Tx: Queries,
{
    let transfer = state
        .engine
        .coordinator()
        .run_in_transaction(move |q| q.get_transfer(transfer_id))
        .await?;

    Ok(Json(transfer))
}
