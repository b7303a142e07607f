//! API module
//!
//! HTTP endpoints over the ledger.

pub mod routes;

pub use routes::{create_router, AppState};
