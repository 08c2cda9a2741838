//! Control-plane handlers.

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::clock::Timeframe;
use crate::error::CoreError;
use crate::models::{Bar, OrderIntent, OrderRecord, OrderStatus, Run, RunCreate, RunStatus};
use crate::store::Page;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::Json;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct RunListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct RunListResponse {
    pub runs: Vec<Run>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

pub async fn list_runs(
    Query(query): Query<RunListQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<RunListResponse>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<RunStatus>())
        .transpose()
        .map_err(CoreError::Validation)?;
    let page = Page::new(query.page, query.page_size);
    let (runs, total) = state.runs.list(status, page)?;
    Ok(Json(RunListResponse {
        runs,
        total,
        page: page.page,
        page_size: page.page_size,
    }))
}

pub async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<RunCreate>,
) -> ApiResult<(StatusCode, Json<Run>)> {
    let run = state.manager.create(request)?;
    Ok((StatusCode::CREATED, Json(run)))
}

pub async fn get_run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<Run>> {
    let run = state
        .runs
        .get(id)?
        .ok_or_else(|| CoreError::not_found(format!("run {id}")))?;
    Ok(Json(run))
}

pub async fn start_run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<Run>> {
    let run = state.manager.start(id).await?;
    Ok(Json(run))
}

pub async fn stop_run(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<Run>> {
    let current = state
        .runs
        .get(id)?
        .ok_or_else(|| CoreError::not_found(format!("run {id}")))?;
    if current.status.is_terminal() {
        return Err(ApiError(CoreError::conflict(format!(
            "run {id} is already {}",
            current.status.as_str()
        ))));
    }
    let run = state.manager.stop(id).await?;
    Ok(Json(run))
}

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub run_id: Option<Uuid>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

pub async fn list_orders(
    Query(query): Query<OrderListQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<OrderListResponse>> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<OrderStatus>())
        .transpose()
        .map_err(CoreError::Validation)?;
    let page = Page::new(query.page, query.page_size);
    let (orders, total) = state.orders.list(query.run_id, status, page)?;
    Ok(Json(OrderListResponse {
        orders,
        total,
        page: page.page,
        page_size: page.page_size,
    }))
}

pub async fn create_order(
    State(state): State<AppState>,
    Json(intent): Json<OrderIntent>,
) -> ApiResult<(StatusCode, Json<OrderRecord>)> {
    let (record, created) = state.manager.submit_order(intent).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(record)))
}

pub async fn get_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<OrderRecord>> {
    let order = state
        .orders
        .get(id)?
        .ok_or_else(|| CoreError::not_found(format!("order {id}")))?;
    Ok(Json(order))
}

pub async fn cancel_order(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<StatusCode> {
    state.manager.cancel_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CandleQuery {
    pub symbol: Option<String>,
    pub timeframe: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CandleResponse {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}

pub async fn candles(
    Query(query): Query<CandleQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<CandleResponse>> {
    let symbol = query
        .symbol
        .ok_or_else(|| CoreError::validation("symbol is required"))?;
    let timeframe: Timeframe = query
        .timeframe
        .ok_or_else(|| CoreError::validation("timeframe is required"))?
        .parse()
        .map_err(CoreError::Validation)?;
    let from = query.from.unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
    let to = query.to.unwrap_or_else(Utc::now);
    let limit = Page::new(None, query.page_size).page_size as usize;

    let bars = state.bars.range(&symbol, timeframe, from, to, limit)?;
    Ok(Json(CandleResponse { symbol, timeframe, bars }))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub run_id: Option<Uuid>,
}

pub async fn events_stream(
    Query(query): Query<StreamQuery>,
    State(state): State<AppState>,
) -> Sse<tokio_stream::wrappers::ReceiverStream<crate::sse::SseMessage>> {
    Sse::new(state.sse.register(query.run_id)).keep_alive(KeepAlive::default())
}
