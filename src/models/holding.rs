use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for the holdings table. Snapshot per `(whale, asset, chain)`,
/// replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Holding {
    pub id: i64,
    pub whale_id: Uuid,
    pub asset_symbol: String,
    pub asset_name: Option<String>,
    pub chain_id: Option<i32>,
    pub amount: Option<Decimal>,
    pub value_usd: Option<Decimal>,
    pub portfolio_percent: Option<f64>,
    pub cost_basis_usd: Option<Decimal>,
    pub avg_unit_cost_usd: Option<Decimal>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewHolding {
    pub asset_symbol: String,
    pub asset_name: Option<String>,
    pub chain_id: i32,
    pub amount: Option<Decimal>,
    pub value_usd: Option<Decimal>,
    pub portfolio_percent: Option<f64>,
}
