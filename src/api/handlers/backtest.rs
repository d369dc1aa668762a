use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::api::types::{TradeItem, TradesResponse};
use crate::copier::{run_backtest, BacktestOutput, BacktestParams};
use crate::db::cursor::TradeCursor;
use crate::db::trade_repo::{self, TradeFilters};
use crate::db::backtest_repo;
use crate::errors::AppError;
use crate::models::CopierSessionRow;
use crate::AppState;

use super::resolve_whale;

#[derive(Debug, Deserialize)]
pub struct CopierBacktestRequest {
    pub chain: String,
    pub address: String,
    #[serde(flatten)]
    pub params: BacktestParams,
}

/// Historical copy-trade simulation for a whale.
pub async fn copier(
    State(state): State<AppState>,
    Json(payload): Json<CopierBacktestRequest>,
) -> Result<Json<BacktestOutput>, AppError> {
    let (whale, _) = resolve_whale(&state, &payload.chain, &payload.address).await?;

    let output = run_backtest(&state.db, &state.oracle, &whale, &payload.params)
        .await
        .map_err(|e| {
            let message = e.to_string();
            if message.contains("no trades") {
                AppError::NotFound("No trades available for backtest".into())
            } else {
                AppError::BadRequest(message)
            }
        })?;

    Ok(Json(output))
}

#[derive(Debug, Deserialize)]
pub struct LiveStartRequest {
    pub chain: String,
    pub address: String,
    pub run_id: i64,
    #[serde(default)]
    pub position_size_pct: Option<f64>,
}

/// Start a live shadow session from a stored backtest preset.
pub async fn live_start(
    State(state): State<AppState>,
    Json(payload): Json<LiveStartRequest>,
) -> Result<Json<CopierSessionRow>, AppError> {
    let (whale, _) = resolve_whale(&state, &payload.chain, &payload.address).await?;

    let run = backtest_repo::get_run(&state.db, payload.run_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Backtest run not found".into()))?;
    if run.whale_id != whale.id {
        return Err(AppError::BadRequest(
            "Backtest run belongs to a different wallet".into(),
        ));
    }

    let session = state
        .copier
        .start_session(&whale, &run, payload.position_size_pct)
        .await?;

    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: i64,
}

pub async fn live_stop(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<CopierSessionRow>, AppError> {
    let stopped = state.copier.stop_session(query.session_id).await?;
    if !stopped {
        // Already inactive is fine; missing row is not.
        if state
            .copier
            .session_status(query.session_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound("Session not found".into()));
        }
    }

    let session = state
        .copier
        .session_status(query.session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".into()))?;
    Ok(Json(session))
}

pub async fn live_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<CopierSessionRow>, AppError> {
    let session = state
        .copier
        .session_status(query.session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".into()))?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct ActiveQuery {
    pub chain: String,
    pub address: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ActiveSessionsResponse {
    pub items: Vec<CopierSessionRow>,
}

/// Active sessions for a wallet, for UI resume after reconnect.
pub async fn live_active(
    State(state): State<AppState>,
    Query(query): Query<ActiveQuery>,
) -> Result<Json<ActiveSessionsResponse>, AppError> {
    let (whale, _) = resolve_whale(&state, &query.chain, &query.address).await?;
    let items = state.copier.list_active(Some(whale.id)).await?;
    Ok(Json(ActiveSessionsResponse { items }))
}

#[derive(Debug, Deserialize)]
pub struct LiveTradesQuery {
    pub chain: String,
    pub address: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default = "default_live_trades_limit")]
    pub limit: i64,
    #[serde(default)]
    pub cursor: Option<String>,
}

fn default_live_trades_limit() -> i64 {
    100
}

/// Recent trades feed for the live copier UI.
pub async fn live_trades(
    State(state): State<AppState>,
    Query(query): Query<LiveTradesQuery>,
) -> Result<Json<TradesResponse>, AppError> {
    let (whale, chain) = resolve_whale(&state, &query.chain, &query.address).await?;

    let cursor = match query.cursor.as_deref() {
        Some(raw) => Some(
            TradeCursor::decode(raw).ok_or_else(|| AppError::BadRequest("Invalid cursor".into()))?,
        ),
        None => None,
    };

    let filters = TradeFilters {
        source: None,
        direction: None,
        since: query.since,
        until: None,
    };

    let page = trade_repo::query_trades(
        &state.db,
        whale.id,
        &filters,
        cursor,
        query.limit.clamp(1, 500),
    )
    .await?;

    let items = page
        .items
        .iter()
        .map(|t| TradeItem::build(t, &chain.slug))
        .collect();

    Ok(Json(TradesResponse {
        items,
        next_cursor: page.next_cursor,
        total: page.total,
    }))
}
