use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use aquafarm_core::{ListParams, ListResult, ServiceError};

use super::{ApiState, PERM_LEDGER_READ, PERM_LEDGER_WRITE, PERM_POND_WRITE};
use crate::model::{
    AdjustmentRequest, CreatePondRequest, MovementListQuery, Pond, SeedingCycle, StockMovement,
    UpdatePondRequest,
};
use crate::store::LedgerScope;

pub(super) fn router(state: ApiState) -> Router {
    Router::new()
        .route("/ponds", post(create_pond).get(list_ponds))
        .route("/ponds/{id}", get(get_pond).patch(update_pond))
        .route("/ponds/{id}/cycles", get(list_cycles))
        .route("/ponds/{id}/movements", get(list_movements))
        .route("/ponds/{id}/balance", get(pond_balance))
        .route("/ponds/{id}/@adjust", post(adjust_pond))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /ponds
// ---------------------------------------------------------------------------

async fn create_pond(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<CreatePondRequest>,
) -> Result<Json<Pond>, ServiceError> {
    state.auth.check(&headers, PERM_POND_WRITE)?;
    Ok(Json(state.manager.create_pond(req)?))
}

// ---------------------------------------------------------------------------
// GET /ponds
// ---------------------------------------------------------------------------

async fn list_ponds(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResult<Pond>>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    let result = state.manager.ponds().list(&params)?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// GET /ponds/{id}, PATCH /ponds/{id}
// ---------------------------------------------------------------------------

async fn get_pond(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Pond>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    Ok(Json(state.manager.ponds().get(&id)?))
}

async fn update_pond(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdatePondRequest>,
) -> Result<Json<Pond>, ServiceError> {
    state.auth.check(&headers, PERM_POND_WRITE)?;
    Ok(Json(state.manager.update_pond(&id, req)?))
}

// ---------------------------------------------------------------------------
// GET /ponds/{id}/cycles
// ---------------------------------------------------------------------------

async fn list_cycles(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<SeedingCycle>>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    state.manager.ponds().get(&id)?;
    Ok(Json(state.manager.cycles().list_for_pond(&id)?))
}

// ---------------------------------------------------------------------------
// GET /ponds/{id}/movements
// ---------------------------------------------------------------------------

async fn list_movements(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<MovementListQuery>,
) -> Result<Json<ListResult<StockMovement>>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    state.manager.ponds().get(&id)?;
    let result = state.manager.ledger().page(&LedgerScope::Pond(id), &query)?;
    Ok(Json(result))
}

// ---------------------------------------------------------------------------
// GET /ponds/{id}/balance
// ---------------------------------------------------------------------------

async fn pond_balance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    state.manager.ponds().get(&id)?;
    let balance = state.manager.balance().pond_balance(&id)?;
    Ok(Json(serde_json::json!({ "pondId": id, "balance": balance })))
}

// ---------------------------------------------------------------------------
// POST /ponds/{id}/@adjust
// ---------------------------------------------------------------------------

async fn adjust_pond(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AdjustmentRequest>,
) -> Result<Json<StockMovement>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.record_pond_adjustment(&id, req).await?))
}
