use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use atm_api_types::{ActionResponse, AmountRequest, AtmSnapshot, OperationKind};
use std::sync::Arc;

use crate::{ApiResult, AppState, bad_request, internal_error};

pub(crate) async fn state(State(state): State<Arc<AppState>>) -> ApiResult<AtmSnapshot> {
    let snapshot = state.engine.snapshot().await.map_err(internal_error)?;
    Ok(Json(snapshot))
}

/// Asks the provider for an account. Wallet failures come back in
/// `last_error`, not as an HTTP error.
pub(crate) async fn connect(State(state): State<Arc<AppState>>) -> ApiResult<AtmSnapshot> {
    let snapshot = state.engine.connect().await.map_err(internal_error)?;
    Ok(Json(snapshot))
}

pub(crate) async fn refresh(State(state): State<Arc<AppState>>) -> ApiResult<AtmSnapshot> {
    let snapshot = state.engine.refresh().await.map_err(internal_error)?;
    Ok(Json(snapshot))
}

pub(crate) async fn deposit(
    state: State<Arc<AppState>>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<ActionResponse> {
    submit(state, OperationKind::Deposit, payload).await
}

pub(crate) async fn withdraw(
    state: State<Arc<AppState>>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<ActionResponse> {
    submit(state, OperationKind::Withdraw, payload).await
}

pub(crate) async fn burn(
    state: State<Arc<AppState>>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<ActionResponse> {
    submit(state, OperationKind::Burn, payload).await
}

/// Blocks until the operation reaches a terminal outcome.
async fn submit(
    State(state): State<Arc<AppState>>,
    kind: OperationKind,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<ActionResponse> {
    let Json(request) = payload.map_err(|rejection| bad_request(&rejection.body_text()))?;
    let response = state
        .engine
        .submit(kind, request.amount)
        .await
        .map_err(internal_error)?;
    Ok(Json(response))
}
