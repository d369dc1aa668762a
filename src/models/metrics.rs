use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One metrics snapshot per `(whale, date)`, rebuilt from trade history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WalletMetricsDaily {
    pub id: i64,
    pub whale_id: Uuid,
    pub date: NaiveDate,
    pub portfolio_value_usd: Option<Decimal>,
    pub roi_percent: Option<f64>,
    pub realized_pnl_usd: Option<Decimal>,
    pub unrealized_pnl_usd: Option<Decimal>,
    pub volume_1d_usd: Option<Decimal>,
    pub trades_1d: Option<i32>,
    pub win_rate_percent: Option<f64>,
}

/// Latest computed snapshot per whale, mirroring the most recent daily row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CurrentWalletMetrics {
    pub whale_id: Uuid,
    pub portfolio_value_usd: Option<Decimal>,
    pub roi_percent: Option<f64>,
    pub realized_pnl_usd: Option<Decimal>,
    pub unrealized_pnl_usd: Option<Decimal>,
    pub volume_30d_usd: Option<Decimal>,
    pub trades_30d: Option<i32>,
    pub win_rate_percent: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}
