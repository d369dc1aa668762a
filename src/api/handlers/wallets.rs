use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;

use crate::api::types::{
    HoldingBody, OpenPosition, PortfolioPoint, RoiPoint, SeriesResponse, TradeItem,
    TradesResponse, WalletDetail, WalletMetricsBody, WhaleSummary,
};
use crate::db::cursor::TradeCursor;
use crate::db::trade_repo::TradeFilters;
use crate::db::{holding_repo, metrics_repo, trade_repo};
use crate::errors::AppError;
use crate::models::{TradeDirection, TradeSource};
use crate::AppState;

use super::resolve_whale;

pub async fn detail(
    State(state): State<AppState>,
    Path((chain_slug, address)): Path<(String, String)>,
) -> Result<Json<WalletDetail>, AppError> {
    let (whale, chain) = resolve_whale(&state, &chain_slug, &address).await?;

    let metrics = metrics_repo::get_current(&state.db, whale.id).await?;
    let holdings = holding_repo::get_holdings(&state.db, whale.id).await?;

    let summary = WhaleSummary::build(&whale, metrics.as_ref(), &chain);
    let metrics_body = WalletMetricsBody {
        roi_percent: metrics.as_ref().and_then(|m| m.roi_percent).unwrap_or(0.0),
        realized_pnl_usd: metrics
            .as_ref()
            .and_then(|m| m.realized_pnl_usd)
            .and_then(|v| v.to_f64())
            .unwrap_or(0.0),
        unrealized_pnl_usd: metrics
            .as_ref()
            .and_then(|m| m.unrealized_pnl_usd)
            .and_then(|v| v.to_f64()),
        portfolio_value_usd: metrics
            .as_ref()
            .and_then(|m| m.portfolio_value_usd)
            .and_then(|v| v.to_f64())
            .unwrap_or(0.0),
        volume_30d_usd: metrics
            .as_ref()
            .and_then(|m| m.volume_30d_usd)
            .and_then(|v| v.to_f64())
            .unwrap_or(0.0),
        trades_30d: metrics.as_ref().and_then(|m| m.trades_30d).unwrap_or(0),
        win_rate_percent: metrics.as_ref().and_then(|m| m.win_rate_percent),
        first_seen_at: whale.first_seen_at,
        last_active_at: whale.last_active_at.or(whale.first_seen_at),
    };

    let holdings_body = holdings
        .iter()
        .map(|h| HoldingBody::build(h, &chain.slug))
        .collect();

    Ok(Json(WalletDetail {
        wallet: summary,
        metrics: metrics_body,
        holdings: holdings_body,
        notes: None,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}

fn default_days() -> i64 {
    30
}

/// ROI time series. An empty series triggers a rebuild before returning, so
/// a freshly ingested whale never yields a blank chart.
pub async fn roi_history(
    State(state): State<AppState>,
    Path((chain_slug, address)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<SeriesResponse<RoiPoint>>, AppError> {
    let (whale, _) = resolve_whale(&state, &chain_slug, &address).await?;
    let since = (Utc::now() - Duration::days(query.days.clamp(1, 3650))).date_naive();

    let mut rows = metrics_repo::daily_since(&state.db, whale.id, since).await?;
    if rows.is_empty() {
        state.engine.full_rebuild(whale.id).await?;
        rows = metrics_repo::daily_since(&state.db, whale.id, since).await?;
    }

    let points = rows
        .iter()
        .map(|r| RoiPoint {
            timestamp: r.date.and_hms_opt(0, 0, 0).expect("midnight").and_utc(),
            roi_percent: r.roi_percent.unwrap_or(0.0),
        })
        .collect();

    Ok(Json(SeriesResponse { points }))
}

/// Portfolio value time series, rebuilding on demand like the ROI series.
pub async fn portfolio_history(
    State(state): State<AppState>,
    Path((chain_slug, address)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<SeriesResponse<PortfolioPoint>>, AppError> {
    let (whale, _) = resolve_whale(&state, &chain_slug, &address).await?;
    let since = (Utc::now() - Duration::days(query.days.clamp(1, 3650))).date_naive();

    let mut rows = metrics_repo::daily_since(&state.db, whale.id, since).await?;
    if rows.is_empty() {
        state.engine.full_rebuild(whale.id).await?;
        rows = metrics_repo::daily_since(&state.db, whale.id, since).await?;
    }

    let points = rows
        .iter()
        .map(|r| PortfolioPoint {
            timestamp: r.date.and_hms_opt(0, 0, 0).expect("midnight").and_utc(),
            value_usd: r
                .portfolio_value_usd
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0),
        })
        .collect();

    Ok(Json(SeriesResponse { points }))
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default = "default_trades_limit")]
    pub limit: i64,
    #[serde(default)]
    pub cursor: Option<String>,
}

fn default_trades_limit() -> i64 {
    200
}

pub async fn trades(
    State(state): State<AppState>,
    Path((chain_slug, address)): Path<(String, String)>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<TradesResponse>, AppError> {
    let (whale, chain) = resolve_whale(&state, &chain_slug, &address).await?;

    if let Some(source) = query.source.as_deref() {
        if TradeSource::from_api_str(source).is_none() {
            return Err(AppError::BadRequest(format!("Invalid source '{source}'")));
        }
    }
    if let Some(direction) = query.direction.as_deref() {
        if TradeDirection::from_api_str(direction).is_none() {
            return Err(AppError::BadRequest(format!(
                "Invalid direction '{direction}'"
            )));
        }
    }

    let cursor = match query.cursor.as_deref() {
        Some(raw) => Some(
            TradeCursor::decode(raw).ok_or_else(|| AppError::BadRequest("Invalid cursor".into()))?,
        ),
        None => None,
    };

    let filters = TradeFilters {
        source: query.source.map(|s| s.to_lowercase()),
        direction: query.direction.map(|d| d.to_lowercase()),
        since: None,
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

/// Open perp positions, straight from the clearinghouse snapshot. Non-perp
/// wallets have no positions view.
pub async fn positions(
    State(state): State<AppState>,
    Path((chain_slug, address)): Path<(String, String)>,
) -> Result<Json<PositionsResponse>, AppError> {
    if chain_slug.to_lowercase() != "perp" {
        return Ok(Json(PositionsResponse { items: Vec::new() }));
    }
    let (whale, _) = resolve_whale(&state, &chain_slug, &address).await?;

    let state_snapshot = state
        .perp_client
        .clearinghouse_state(&whale.address)
        .await
        .map_err(|e| AppError::Upstream(format!("Failed to fetch positions: {e}")))?;

    let items = state_snapshot
        .positions()
        .into_iter()
        .map(|pos| {
            let size = pos.szi;
            let entry = pos.entry_px.and_then(|p| p.to_f64());
            let value = pos
                .position_value
                .and_then(|v| v.to_f64())
                .or_else(|| {
                    pos.entry_px
                        .map(|p| (size.abs() * p))
                        .and_then(|v| v.to_f64())
                });
            let mark = pos
                .position_value
                .filter(|_| !size.is_zero())
                .map(|v| (v / size.abs()))
                .and_then(|m| m.to_f64())
                .or(entry);
            let unrealized = pos.unrealized_pnl.and_then(|p| p.to_f64());

            OpenPosition {
                asset: pos.coin.to_uppercase(),
                direction: if size >= rust_decimal::Decimal::ZERO {
                    "long".into()
                } else {
                    "short".into()
                },
                size: size.abs().to_f64().unwrap_or(0.0),
                entry_price_usd: entry,
                mark_price_usd: mark,
                value_usd: value,
                unrealized_pnl_usd: unrealized,
            }
        })
        .collect();

    Ok(Json(PositionsResponse { items }))
}

#[derive(Debug, serde::Serialize)]
pub struct PositionsResponse {
    pub items: Vec<OpenPosition>,
}
