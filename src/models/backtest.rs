use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Stored copier backtest configuration and result summary. Live sessions
/// reference a run to pick up its sizing preset.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BacktestRun {
    pub id: i64,
    pub whale_id: Uuid,
    pub created_at: Option<DateTime<Utc>>,
    pub initial_deposit_usd: Option<Decimal>,
    pub position_size_pct: Option<f64>,
    pub fee_bps: Option<i32>,
    pub slippage_bps: Option<i32>,
    pub leverage: Option<Decimal>,
    pub asset_symbols: Option<serde_json::Value>,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub recommended_position_pct: Option<f64>,
    pub gross_pnl_usd: Option<Decimal>,
    pub net_pnl_usd: Option<Decimal>,
    pub total_fees_usd: Option<Decimal>,
    pub total_slippage_usd: Option<Decimal>,
    pub roi_percent: Option<f64>,
    pub max_drawdown_percent: Option<f64>,
    pub max_drawdown_usd: Option<Decimal>,
    pub trades_copied: Option<i32>,
    pub win_rate_percent: Option<f64>,
}

impl BacktestRun {
    pub fn asset_filter(&self) -> Option<Vec<String>> {
        let arr = self.asset_symbols.as_ref()?.as_array()?;
        let symbols: Vec<String> = arr
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect();
        if symbols.is_empty() {
            None
        } else {
            Some(symbols)
        }
    }
}

/// Persisted state of a live copier session.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CopierSessionRow {
    pub id: i64,
    pub whale_id: Uuid,
    pub run_id: Option<i64>,
    pub active: bool,
    pub position_size_pct: Option<f64>,
    pub processed_trades: i32,
    pub last_seen_fill: Option<i64>,
    pub notifications: serde_json::Value,
    pub errors: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}
