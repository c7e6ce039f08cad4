use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};

use aquafarm_core::{ListResult, ServiceError};

use super::{ApiState, PERM_LEDGER_READ, PERM_LEDGER_WRITE};
use crate::model::{
    AdjustmentRequest, AsOfQuery, CloseCycleRequest, CycleSummary, GrowthSampling,
    HarvestEstimate, HarvestRealization, HarvestRecorded, HarvestRequest, MortalityRequest,
    MovementListQuery, OpenCycleRequest, RealizationRequest, ReconcileReport, SamplingRecorded,
    SamplingRequest, SeedingCycle, StockMovement, TransferRecorded, TransferRequest,
};
use crate::store::LedgerScope;

pub(super) fn router(state: ApiState) -> Router {
    Router::new()
        .route("/cycles", post(open_cycle))
        .route("/cycles/{id}", get(get_cycle))
        .route("/cycles/{id}/balance", get(cycle_balance))
        .route("/cycles/{id}/summary", get(cycle_summary))
        .route("/cycles/{id}/movements", get(list_movements))
        .route("/cycles/{id}/estimate", get(estimate))
        .route("/cycles/{id}/@reconcile", get(reconcile))
        .route("/cycles/{id}/@mortality", post(record_mortality))
        .route("/cycles/{id}/@harvest", post(record_harvest))
        .route("/cycles/{id}/@adjust", post(record_adjustment))
        .route("/cycles/{id}/@transfer", post(transfer))
        .route("/cycles/{id}/@begin-harvest", post(begin_harvest))
        .route("/cycles/{id}/@close", post(close_cycle))
        .route(
            "/cycles/{id}/@samplings",
            get(list_samplings).post(record_sampling),
        )
        .route(
            "/cycles/{id}/@realizations",
            get(list_realizations).post(record_realization),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// POST /cycles
// ---------------------------------------------------------------------------

async fn open_cycle(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<OpenCycleRequest>,
) -> Result<Json<SeedingCycle>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.open(req).await?))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

async fn get_cycle(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SeedingCycle>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    Ok(Json(state.manager.cycles().get(&id)?))
}

async fn cycle_balance(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    state.manager.cycles().get(&id)?;
    let balance = match query.as_of {
        Some(date) => state.manager.balance().balance_as_of(&id, date)?,
        None => state.manager.balance().current_balance(&id)?,
    };
    Ok(Json(serde_json::json!({
        "cycleId": id,
        "asOf": query.as_of,
        "balance": balance,
    })))
}

async fn cycle_summary(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<CycleSummary>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    Ok(Json(state.manager.summary(&id)?))
}

async fn list_movements(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<MovementListQuery>,
) -> Result<Json<ListResult<StockMovement>>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    state.manager.cycles().get(&id)?;
    let result = state.manager.ledger().page(&LedgerScope::Cycle(id), &query)?;
    Ok(Json(result))
}

async fn estimate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<AsOfQuery>,
) -> Result<Json<HarvestEstimate>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    Ok(Json(state.manager.estimate_harvest(&id, query.as_of)?))
}

async fn reconcile(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ReconcileReport>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    Ok(Json(state.manager.reconcile(&id)?))
}

async fn list_samplings(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<GrowthSampling>>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    state.manager.cycles().get(&id)?;
    Ok(Json(state.manager.records().list_samplings(&id)?))
}

async fn list_realizations(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<HarvestRealization>>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_READ)?;
    state.manager.cycles().get(&id)?;
    Ok(Json(state.manager.records().list_realizations(&id)?))
}

// ---------------------------------------------------------------------------
// Ledger events
// ---------------------------------------------------------------------------

async fn record_mortality(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<MortalityRequest>,
) -> Result<Json<StockMovement>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.record_mortality(&id, req).await?))
}

async fn record_harvest(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<HarvestRequest>,
) -> Result<Json<StockMovement>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.record_harvest(&id, req).await?))
}

async fn record_adjustment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AdjustmentRequest>,
) -> Result<Json<StockMovement>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.record_adjustment(&id, req).await?))
}

async fn transfer(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferRecorded>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.transfer(&id, req).await?))
}

async fn record_sampling(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SamplingRequest>,
) -> Result<Json<SamplingRecorded>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.record_sampling(&id, req).await?))
}

async fn record_realization(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<RealizationRequest>,
) -> Result<Json<HarvestRecorded>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.record_realization(&id, req).await?))
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

async fn begin_harvest(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SeedingCycle>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.begin_harvest(&id).await?))
}

async fn close_cycle(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<CloseCycleRequest>,
) -> Result<Json<SeedingCycle>, ServiceError> {
    state.auth.check(&headers, PERM_LEDGER_WRITE)?;
    Ok(Json(state.manager.close(&id, req).await?))
}
