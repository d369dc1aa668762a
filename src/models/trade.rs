use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::{TradeDirection, TradeSource};

/// Database row for the trades table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: i64,
    pub whale_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub chain_id: Option<i32>,
    pub source: String,
    pub platform: Option<String>,
    pub direction: String,
    pub base_asset: Option<String>,
    pub quote_asset: Option<String>,
    pub amount_base: Option<Decimal>,
    pub amount_quote: Option<Decimal>,
    pub value_usd: Option<Decimal>,
    pub pnl_usd: Option<Decimal>,
    pub pnl_percent: Option<f64>,
    pub open_price_usd: Option<Decimal>,
    pub close_price_usd: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub external_url: Option<String>,
    pub catalog_version: Option<i32>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn direction_enum(&self) -> Option<TradeDirection> {
        TradeDirection::from_api_str(&self.direction)
    }

    /// Unit price implied by value and base amount, when both are known.
    pub fn unit_price_usd(&self) -> Option<Decimal> {
        let value = self.value_usd?;
        let amount = self.amount_base?;
        if amount.is_zero() {
            return None;
        }
        Some(value.abs() / amount.abs())
    }
}

/// A normalized trade produced by a collector, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub whale_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub chain_id: i32,
    pub source: TradeSource,
    pub platform: String,
    pub direction: TradeDirection,
    pub base_asset: Option<String>,
    pub quote_asset: Option<String>,
    pub amount_base: Option<Decimal>,
    pub amount_quote: Option<Decimal>,
    pub value_usd: Option<Decimal>,
    pub pnl_usd: Option<Decimal>,
    pub pnl_percent: Option<f64>,
    pub open_price_usd: Option<Decimal>,
    pub close_price_usd: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub external_url: Option<String>,
    pub catalog_version: Option<i32>,
}
