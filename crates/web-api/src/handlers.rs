//! Read endpoints and the admin control surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use daytrader_core::Overrides;
use daytrader_data::{
    AlertRow, DailySummaryRow, EnabledStrategyRow, FavoriteRow, PriceSnapshotRow, TradeEventRow,
    TradeRow,
};

use crate::server::ApiState;

type ApiResult<T> = Result<Json<T>, StatusCode>;

fn internal<E: std::fmt::Display>(err: E) -> StatusCode {
    tracing::error!(%err, "Handler failure");
    StatusCode::INTERNAL_SERVER_ERROR
}

pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

#[derive(Deserialize)]
pub struct TradeListQuery {
    pub date: Option<NaiveDate>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

const fn default_limit() -> i64 {
    100
}

pub async fn list_trades(
    State(state): State<ApiState>,
    Query(query): Query<TradeListQuery>,
) -> ApiResult<Vec<TradeRow>> {
    state
        .store
        .list_trades(query.date, query.limit)
        .await
        .map(Json)
        .map_err(internal)
}

pub async fn get_trade(
    State(state): State<ApiState>,
    Path(trade_id): Path<i64>,
) -> ApiResult<TradeRow> {
    match state.store.get_trade(trade_id).await.map_err(internal)? {
        Some(trade) => Ok(Json(trade)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn trade_events(
    State(state): State<ApiState>,
    Path(trade_id): Path<i64>,
) -> ApiResult<Vec<TradeEventRow>> {
    state
        .store
        .trade_events(trade_id)
        .await
        .map(Json)
        .map_err(internal)
}

pub async fn trade_snapshots(
    State(state): State<ApiState>,
    Path(trade_id): Path<i64>,
) -> ApiResult<Vec<PriceSnapshotRow>> {
    state
        .store
        .price_snapshots(trade_id)
        .await
        .map(Json)
        .map_err(internal)
}

pub async fn list_alerts(State(state): State<ApiState>) -> ApiResult<Vec<AlertRow>> {
    state.store.list_alerts(200).await.map(Json).map_err(internal)
}

pub async fn daily_summary(
    State(state): State<ApiState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<DailySummaryRow> {
    match state.store.daily_summary(date).await.map_err(internal)? {
        Some(summary) => Ok(Json(summary)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

fn admission_response(outcome: daytrader_engine::Admission) -> Json<JsonValue> {
    match outcome {
        daytrader_engine::Admission::Accepted { trade_id, message } => {
            Json(json!({ "status": "accepted", "message": message, "trade_id": trade_id }))
        }
        daytrader_engine::Admission::Rejected { reason, message } => {
            Json(json!({ "status": "rejected", "reason": reason, "message": message }))
        }
        daytrader_engine::Admission::Errored { message } => {
            Json(json!({ "status": "rejected", "message": message }))
        }
    }
}

/// Flattens the most recent open position at market.
pub async fn manual_close(State(state): State<ApiState>) -> ApiResult<JsonValue> {
    let outcome = state.pipeline.manual_close().await.map_err(internal)?;
    Ok(admission_response(outcome))
}

/// Re-enters the direction of a finished trade with a fresh contract.
pub async fn retake_trade(
    State(state): State<ApiState>,
    Path(trade_id): Path<i64>,
) -> ApiResult<JsonValue> {
    let outcome = state.pipeline.retake(trade_id).await.map_err(internal)?;
    Ok(admission_response(outcome))
}

// ── Enabled strategies ───────────────────────────────────────────────

pub async fn list_strategies(State(state): State<ApiState>) -> ApiResult<Vec<EnabledStrategyRow>> {
    state
        .strategies
        .list_enabled()
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Deserialize)]
pub struct EnableStrategyRequest {
    pub ticker: String,
    pub timeframe: String,
    pub signal_type: String,
    #[serde(default)]
    pub params: JsonValue,
}

pub async fn enable_strategy(
    State(state): State<ApiState>,
    Json(req): Json<EnableStrategyRequest>,
) -> ApiResult<EnabledStrategyRow> {
    state
        .strategies
        .enable(&req.ticker, &req.timeframe, &req.signal_type, &req.params)
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Deserialize)]
pub struct DisableStrategyRequest {
    pub ticker: String,
    pub timeframe: String,
    pub signal_type: String,
}

pub async fn disable_strategy(
    State(state): State<ApiState>,
    Json(req): Json<DisableStrategyRequest>,
) -> ApiResult<JsonValue> {
    let removed = state
        .strategies
        .disable(&req.ticker, &req.timeframe, &req.signal_type)
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "disabled": removed })))
}

// ── Operator overrides ───────────────────────────────────────────────

pub async fn get_overrides(State(state): State<ApiState>) -> Json<Overrides> {
    Json(*state.overrides.read())
}

pub async fn set_overrides(
    State(state): State<ApiState>,
    Json(new): Json<Overrides>,
) -> Json<Overrides> {
    *state.overrides.write() = new;
    tracing::info!(
        ignore_session_windows = new.ignore_session_windows,
        use_market_exits = new.use_market_exits,
        "Operator overrides updated"
    );
    Json(new)
}

// ── Favorites ────────────────────────────────────────────────────────

pub async fn list_favorites(State(state): State<ApiState>) -> ApiResult<Vec<FavoriteRow>> {
    state
        .strategies
        .list_favorites()
        .await
        .map(Json)
        .map_err(internal)
}

#[derive(Deserialize)]
pub struct CreateFavoriteRequest {
    pub ticker: String,
    pub timeframe: String,
    pub signal_type: String,
    #[serde(default)]
    pub params: JsonValue,
    pub label: Option<String>,
}

pub async fn create_favorite(
    State(state): State<ApiState>,
    Json(req): Json<CreateFavoriteRequest>,
) -> ApiResult<FavoriteRow> {
    state
        .strategies
        .create_favorite(
            &req.ticker,
            &req.timeframe,
            &req.signal_type,
            &req.params,
            req.label.as_deref(),
        )
        .await
        .map(Json)
        .map_err(internal)
}

pub async fn delete_favorite(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> ApiResult<JsonValue> {
    let removed = state.strategies.delete_favorite(id).await.map_err(internal)?;
    if removed {
        Ok(Json(json!({ "deleted": true })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
