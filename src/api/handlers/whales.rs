use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::types::{
    BackfillStatusBody, ListResponse, WhaleCreateRequest, WhalePatchRequest, WhaleSummary,
};
use crate::db::whale_repo::{self, WhaleListFilters, WhaleSort};
use crate::db::metrics_repo;
use crate::errors::AppError;
use crate::models::WhaleType;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WhaleListQuery {
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default, rename = "type")]
    pub whale_type: Option<String>,
    #[serde(default, rename = "minRoi")]
    pub min_roi: Option<f64>,
    #[serde(default, rename = "activityWindow")]
    pub activity_window: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default, rename = "sortBy")]
    pub sort_by: Option<String>,
    #[serde(default, rename = "sortDir")]
    pub sort_dir: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<WhaleListQuery>,
) -> Result<Json<ListResponse<WhaleSummary>>, AppError> {
    let filters = WhaleListFilters {
        chains: query
            .chain
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        whale_type: query.whale_type.clone(),
        min_roi: query.min_roi,
        active_since: query.activity_window.as_deref().and_then(|raw| {
            let hours: i64 = raw.trim_end_matches('h').parse().ok()?;
            Some(Utc::now() - Duration::hours(hours))
        }),
        search: query.search.clone(),
    };

    let sort = WhaleSort::from_api_str(query.sort_by.as_deref());
    let descending = !matches!(query.sort_dir.as_deref(), Some("asc") | Some("ASC"));
    let limit = query.limit.clamp(1, 500);
    let offset = query.offset.max(0);

    let page = whale_repo::list_whales(&state.db, &filters, sort, descending, limit, offset).await?;

    let items = page
        .items
        .iter()
        .map(|(whale, metrics, chain)| WhaleSummary::build(whale, metrics.as_ref(), chain))
        .collect();

    Ok(Json(ListResponse {
        items,
        total: page.total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    #[serde(default = "default_top_limit")]
    pub limit: i64,
}

fn default_top_limit() -> i64 {
    10
}

/// Top whales by ROI descending.
pub async fn top(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Result<Json<ListResponse<WhaleSummary>>, AppError> {
    let page = whale_repo::list_whales(
        &state.db,
        &WhaleListFilters::default(),
        WhaleSort::Roi,
        true,
        query.limit.clamp(1, 100),
        0,
    )
    .await?;

    let items = page
        .items
        .iter()
        .map(|(whale, metrics, chain)| WhaleSummary::build(whale, metrics.as_ref(), chain))
        .collect();

    Ok(Json(ListResponse {
        items,
        total: page.total,
    }))
}

/// Register a new whale and kick off its history backfill asynchronously.
pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<WhaleCreateRequest>,
) -> Result<(StatusCode, Json<WhaleSummary>), AppError> {
    let chain = whale_repo::get_chain_by_slug(&state.db, &payload.chain)
        .await?
        .ok_or_else(|| AppError::BadRequest(format!("Unknown chain '{}'", payload.chain)))?;

    if let Some(whale_type) = payload.whale_type.as_deref() {
        if WhaleType::from_api_str(whale_type).is_none() {
            return Err(AppError::BadRequest(format!(
                "Invalid whale type '{whale_type}'"
            )));
        }
    }

    if whale_repo::get_whale_by_address(&state.db, chain.id, &payload.address)
        .await?
        .is_some()
    {
        return Err(AppError::BadRequest(
            "Whale already exists for this chain".into(),
        ));
    }

    let labels = payload.labels.unwrap_or_default();
    let whale = whale_repo::create_whale(
        &state.db,
        chain.id,
        &payload.address,
        payload.whale_type.as_deref(),
        &labels,
    )
    .await?;

    tracing::info!(address = %whale.address, chain = %chain.slug, "Whale registered");

    state.backfill.start_backfill(&whale).await?;

    let metrics = metrics_repo::get_current(&state.db, whale.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(WhaleSummary::build(&whale, metrics.as_ref(), &chain)),
    ))
}

pub async fn patch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<WhalePatchRequest>,
) -> Result<Json<WhaleSummary>, AppError> {
    if let Some(whale_type) = payload.whale_type.as_deref() {
        if WhaleType::from_api_str(whale_type).is_none() {
            return Err(AppError::BadRequest(format!(
                "Invalid whale type '{whale_type}'"
            )));
        }
    }

    let whale = whale_repo::update_whale(
        &state.db,
        id,
        payload.whale_type.as_deref(),
        payload.labels.as_deref(),
    )
    .await?
    .ok_or_else(|| AppError::NotFound("Whale not found".into()))?;

    let chain = whale_repo::get_chain(&state.db, whale.chain_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Chain not found".into()))?;
    let metrics = metrics_repo::get_current(&state.db, whale.id).await?;

    Ok(Json(WhaleSummary::build(&whale, metrics.as_ref(), &chain)))
}

/// Delete a whale. Owned rows cascade; live copier sessions are stopped.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.copier.stop_sessions_for_whale(id).await?;

    let deleted = whale_repo::delete_whale(&state.db, id).await?;
    if !deleted {
        return Err(AppError::NotFound("Whale not found".into()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn backfill_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackfillStatusBody>, AppError> {
    whale_repo::get_whale(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Whale not found".into()))?;

    let status = state.backfill.status(id).await?;
    Ok(Json(status.into()))
}

pub async fn start_backfill(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackfillStatusBody>, AppError> {
    let whale = whale_repo::get_whale(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Whale not found".into()))?;

    let status = state.backfill.start_backfill(&whale).await?;
    Ok(Json(status.into()))
}

/// Perp-only: wipe this wallet's derived data and re-ingest from scratch.
pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BackfillStatusBody>, AppError> {
    let whale = whale_repo::get_whale(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Whale not found".into()))?;

    let status = state
        .backfill
        .start_reset(&whale)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(status.into()))
}
