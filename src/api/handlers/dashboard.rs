use axum::extract::State;
use axum::Json;
use chrono::{Duration, Utc};
use rust_decimal::prelude::ToPrimitive;

use crate::api::types::DashboardSummary;
use crate::db::{trade_repo, whale_repo};
use crate::errors::AppError;
use crate::AppState;

pub async fn summary(State(state): State<AppState>) -> Result<Json<DashboardSummary>, AppError> {
    let counts = whale_repo::dashboard_counts(&state.db).await?;
    let volume_24h =
        trade_repo::total_volume_since(&state.db, Utc::now() - Duration::hours(24)).await?;

    Ok(Json(DashboardSummary {
        total_tracked_whales: counts.total_tracked,
        active_whales_24h: counts.active_24h,
        total_volume_24h_usd: volume_24h.to_f64().unwrap_or(0.0),
        perp_whales: counts.perp_whales,
    }))
}
