use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::whale::explorer_url;
use crate::models::{BackfillStatus, Chain, CurrentWalletMetrics, Holding, Trade, Whale};

#[derive(Debug, Serialize)]
pub struct ListResponse<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Whales
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct WhaleSummary {
    pub id: Uuid,
    pub address: String,
    pub chain: String,
    #[serde(rename = "type")]
    pub whale_type: Option<String>,
    pub labels: Vec<String>,
    pub external_explorer_url: String,
    pub roi_percent: f64,
    pub realized_pnl_usd: f64,
    pub unrealized_pnl_usd: Option<f64>,
    pub portfolio_value_usd: f64,
    pub volume_30d_usd: f64,
    pub trades_30d: i32,
    pub win_rate_percent: Option<f64>,
    pub last_active_at: Option<DateTime<Utc>>,
}

impl WhaleSummary {
    pub fn build(whale: &Whale, metrics: Option<&CurrentWalletMetrics>, chain: &Chain) -> Self {
        Self {
            id: whale.id,
            address: whale.address.clone(),
            chain: chain.slug.clone(),
            whale_type: whale.whale_type.clone(),
            labels: whale.label_list(),
            external_explorer_url: explorer_url(&chain.slug, &whale.address),
            roi_percent: metrics.and_then(|m| m.roi_percent).unwrap_or(0.0),
            realized_pnl_usd: metrics
                .and_then(|m| m.realized_pnl_usd)
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0),
            unrealized_pnl_usd: metrics
                .and_then(|m| m.unrealized_pnl_usd)
                .and_then(|v| v.to_f64()),
            portfolio_value_usd: metrics
                .and_then(|m| m.portfolio_value_usd)
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0),
            volume_30d_usd: metrics
                .and_then(|m| m.volume_30d_usd)
                .and_then(|v| v.to_f64())
                .unwrap_or(0.0),
            trades_30d: metrics.and_then(|m| m.trades_30d).unwrap_or(0),
            win_rate_percent: metrics.and_then(|m| m.win_rate_percent),
            last_active_at: whale.last_active_at.or(whale.first_seen_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WhaleCreateRequest {
    pub chain: String,
    pub address: String,
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default, rename = "type")]
    pub whale_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WhalePatchRequest {
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    #[serde(default, rename = "type")]
    pub whale_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Wallet detail
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct WalletMetricsBody {
    pub roi_percent: f64,
    pub realized_pnl_usd: f64,
    pub unrealized_pnl_usd: Option<f64>,
    pub portfolio_value_usd: f64,
    pub volume_30d_usd: f64,
    pub trades_30d: i32,
    pub win_rate_percent: Option<f64>,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct HoldingBody {
    pub asset_symbol: String,
    pub asset_name: String,
    pub chain: String,
    pub amount: String,
    pub value_usd: f64,
    pub portfolio_percent: f64,
    pub cost_basis_usd: Option<f64>,
    pub avg_unit_cost_usd: Option<f64>,
}

impl HoldingBody {
    pub fn build(holding: &Holding, chain_slug: &str) -> Self {
        Self {
            asset_symbol: holding.asset_symbol.clone(),
            asset_name: holding
                .asset_name
                .clone()
                .unwrap_or_else(|| holding.asset_symbol.clone()),
            chain: chain_slug.to_string(),
            amount: holding
                .amount
                .map(|a| a.normalize().to_string())
                .unwrap_or_else(|| "0".into()),
            value_usd: holding.value_usd.and_then(|v| v.to_f64()).unwrap_or(0.0),
            portfolio_percent: holding.portfolio_percent.unwrap_or(0.0),
            cost_basis_usd: holding.cost_basis_usd.and_then(|v| v.to_f64()),
            avg_unit_cost_usd: holding.avg_unit_cost_usd.and_then(|v| v.to_f64()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WalletDetail {
    pub wallet: WhaleSummary,
    pub metrics: WalletMetricsBody,
    pub holdings: Vec<HoldingBody>,
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// History series
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct RoiPoint {
    pub timestamp: DateTime<Utc>,
    pub roi_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct PortfolioPoint {
    pub timestamp: DateTime<Utc>,
    pub value_usd: f64,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse<T: Serialize> {
    pub points: Vec<T>,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TradeItem {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub chain: String,
    pub source: String,
    pub platform: String,
    pub direction: String,
    pub base_asset: Option<String>,
    pub quote_asset: Option<String>,
    pub amount_base: Option<String>,
    pub amount_quote: Option<String>,
    pub value_usd: f64,
    pub pnl_usd: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub tx_hash: Option<String>,
    pub external_url: Option<String>,
    pub price_usd: Option<f64>,
    pub open_price_usd: Option<f64>,
    pub close_price_usd: Option<f64>,
}

impl TradeItem {
    pub fn build(trade: &Trade, chain_slug: &str) -> Self {
        let price = trade.unit_price_usd();
        let direction = trade.direction.to_lowercase();

        let mut open_price = trade.open_price_usd.or_else(|| {
            matches!(direction.as_str(), "buy" | "long" | "short")
                .then_some(price)
                .flatten()
        });
        let close_price = trade.close_price_usd.or_else(|| {
            matches!(
                direction.as_str(),
                "sell" | "withdraw" | "close_long" | "close_short"
            )
            .then_some(price)
            .flatten()
        });

        // Back-solve the entry price for closes when PnL and size are known.
        if open_price.is_none() {
            if let (Some(close), Some(pnl), Some(amount)) =
                (close_price, trade.pnl_usd, trade.amount_base)
            {
                let size = amount.abs();
                if !size.is_zero() {
                    let per_unit = pnl / size;
                    open_price = match direction.as_str() {
                        "close_long" => Some(close - per_unit),
                        "close_short" => Some(close + per_unit),
                        _ => None,
                    };
                }
            }
        }

        Self {
            id: trade.id.to_string(),
            timestamp: trade.timestamp,
            chain: chain_slug.to_string(),
            source: trade.source.clone(),
            platform: trade.platform.clone().unwrap_or_default(),
            direction,
            base_asset: trade.base_asset.clone(),
            quote_asset: trade.quote_asset.clone(),
            amount_base: trade.amount_base.map(|a| a.normalize().to_string()),
            amount_quote: trade.amount_quote.map(|a| a.normalize().to_string()),
            value_usd: trade.value_usd.and_then(|v| v.to_f64()).unwrap_or(0.0),
            pnl_usd: trade.pnl_usd.and_then(|v| v.to_f64()),
            pnl_percent: trade.pnl_percent,
            tx_hash: trade.tx_hash.clone(),
            external_url: trade.external_url.clone(),
            price_usd: price.and_then(|p| p.to_f64()),
            open_price_usd: open_price.and_then(|p| p.to_f64()),
            close_price_usd: close_price.and_then(|p| p.to_f64()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub items: Vec<TradeItem>,
    pub next_cursor: Option<String>,
    pub total: i64,
}

// ---------------------------------------------------------------------------
// Positions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct OpenPosition {
    pub asset: String,
    pub direction: String,
    pub size: f64,
    pub entry_price_usd: Option<f64>,
    pub mark_price_usd: Option<f64>,
    pub value_usd: Option<f64>,
    pub unrealized_pnl_usd: Option<f64>,
}

// ---------------------------------------------------------------------------
// Dashboard & backfill
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub total_tracked_whales: i64,
    pub active_whales_24h: i64,
    pub total_volume_24h_usd: f64,
    pub perp_whales: i64,
}

#[derive(Debug, Serialize)]
pub struct BackfillStatusBody {
    pub status: String,
    pub progress: f64,
    pub message: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<BackfillStatus> for BackfillStatusBody {
    fn from(status: BackfillStatus) -> Self {
        Self {
            status: status.state,
            progress: status.progress,
            message: status.message,
            updated_at: status.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn close_trade(direction: &str) -> Trade {
        Trade {
            id: 7,
            whale_id: Uuid::nil(),
            timestamp: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            chain_id: Some(3),
            source: "perp".into(),
            platform: Some("perp".into()),
            direction: direction.into(),
            base_asset: Some("ETH".into()),
            quote_asset: Some("USD".into()),
            amount_base: Some(dec!(-2)),
            amount_quote: None,
            value_usd: Some(dec!(6000)),
            pnl_usd: Some(dec!(400)),
            pnl_percent: None,
            open_price_usd: None,
            close_price_usd: None,
            tx_hash: None,
            external_url: None,
            catalog_version: None,
            created_at: None,
        }
    }

    #[test]
    fn back_solves_entry_price_for_close_long() {
        let item = TradeItem::build(&close_trade("close_long"), "perp");
        // close at 3000, +400 over 2 units → entry 2800
        assert_eq!(item.close_price_usd, Some(3000.0));
        assert_eq!(item.open_price_usd, Some(2800.0));
    }

    #[test]
    fn back_solves_entry_price_for_close_short() {
        let item = TradeItem::build(&close_trade("close_short"), "perp");
        // short covered at 3000 with +400 on 2 units → entry 3200
        assert_eq!(item.open_price_usd, Some(3200.0));
    }
}
