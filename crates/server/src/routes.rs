//! Fetch-API routes: peer shards (or this very node) ask here whether an
//! account is able to receive transfers, and for a debtor's raw root
//! configuration.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tracing::error;

use ledgerd_core::ROOT_CREDITOR_ID;
use ledgerd_store::{AccountRow, LedgerStore};

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn LedgerStore>,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/accounts/:debtor_id/:creditor_id/reachable", get(account_reachable))
        .route("/debtors/:debtor_id/config", get(debtor_config))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn load_account(
    state: &ApiState,
    debtor_id: i64,
    creditor_id: i64,
) -> Result<Option<AccountRow>, StatusCode> {
    let mut tx = state.store.begin().await.map_err(|err| {
        error!(error = %err, "fetch API could not open a transaction");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let account = tx.get_account(debtor_id, creditor_id).await.map_err(|err| {
        error!(error = %err, "fetch API account lookup failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let _ = tx.rollback().await;
    Ok(account)
}

async fn account_reachable(
    State(state): State<ApiState>,
    Path((debtor_id, creditor_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(account) = load_account(&state, debtor_id, creditor_id).await? else {
        return Err(StatusCode::NOT_FOUND);
    };
    let status = if account.is_scheduled_for_deletion() {
        "scheduled_for_deletion"
    } else if account.is_unreachable() {
        "unreachable"
    } else {
        "reachable"
    };
    Ok(Json(serde_json::json!({ "status": status })))
}

/// The debtor's raw root `config_data` string; callers parse it
/// themselves. 404 for unknown currencies.
async fn debtor_config(
    State(state): State<ApiState>,
    Path(debtor_id): Path<i64>,
) -> Result<impl IntoResponse, StatusCode> {
    let Some(account) = load_account(&state, debtor_id, ROOT_CREDITOR_ID).await? else {
        return Err(StatusCode::NOT_FOUND);
    };
    Ok(account.config_data)
}
