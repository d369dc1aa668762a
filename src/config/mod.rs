use rust_decimal::Decimal;
use std::env;

use crate::models::EventType;

const DEFAULT_UTXO_API: &str = "https://mempool.space/api";
const DEFAULT_PERP_INFO: &str = "https://api.hyperliquid.xyz/info";
const DEFAULT_PRICE_API: &str = "https://api.coingecko.com/api/v3";

/// Per-event-type USD thresholds above which a trade produces a broadcast
/// event.
#[derive(Debug, Clone)]
pub struct EventThresholds {
    pub large_swap: Decimal,
    pub large_transfer: Decimal,
    pub exchange_flow: Decimal,
    pub perp_trade: Decimal,
}

impl EventThresholds {
    pub fn for_type(&self, event_type: EventType) -> Decimal {
        match event_type {
            EventType::LargeSwap => self.large_swap,
            EventType::LargeTransfer => self.large_transfer,
            EventType::ExchangeFlow => self.exchange_flow,
            EventType::PerpTrade => self.perp_trade,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Source endpoints
    pub evm_rpc_http_url: Option<String>,
    pub evm_rpc_ws_url: Option<String>,
    pub utxo_api_base_url: String,
    pub perp_info_url: String,
    pub price_api_base_url: String,

    // Worker toggles
    pub enable_ingestors: bool,
    pub enable_scheduler: bool,

    // Collector cadence (seconds)
    pub evm_poll_interval_secs: u64,
    pub utxo_poll_interval_secs: u64,
    pub perp_poll_interval_secs: u64,

    // Broadcast thresholds
    pub event_thresholds: EventThresholds,

    // Classifier thresholds
    pub classifier_freq_hi: i64,
    pub classifier_volume_ratio_hi: f64,

    // Price cache TTL
    pub price_cache_ttl_secs: u64,
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: i64) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| Decimal::from(default))
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT").unwrap_or_else(|_| "8080".into()).parse()?,

            evm_rpc_http_url: env::var("EVM_RPC_HTTP_URL").ok(),
            evm_rpc_ws_url: env::var("EVM_RPC_WS_URL").ok(),
            utxo_api_base_url: env::var("UTXO_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_UTXO_API.into()),
            perp_info_url: env::var("PERP_INFO_URL")
                .unwrap_or_else(|_| DEFAULT_PERP_INFO.into()),
            price_api_base_url: env::var("PRICE_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_PRICE_API.into()),

            enable_ingestors: env_bool("ENABLE_INGESTORS", true),
            enable_scheduler: env_bool("ENABLE_SCHEDULER", true),

            evm_poll_interval_secs: env_u64("EVM_POLL_INTERVAL_SECS", 15),
            utxo_poll_interval_secs: env_u64("UTXO_POLL_INTERVAL_SECS", 60),
            perp_poll_interval_secs: env_u64("PERP_POLL_INTERVAL_SECS", 300),

            event_thresholds: EventThresholds {
                large_swap: env_decimal("EVENT_THRESHOLD_USD_LARGE_SWAP", 500_000),
                large_transfer: env_decimal("EVENT_THRESHOLD_USD_LARGE_TRANSFER", 1_000_000),
                exchange_flow: env_decimal("EVENT_THRESHOLD_USD_EXCHANGE_FLOW", 500_000),
                perp_trade: env_decimal("EVENT_THRESHOLD_USD_PERP_TRADE", 250_000),
            },

            classifier_freq_hi: env::var("CLASSIFIER_FREQ_HI")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            classifier_volume_ratio_hi: env::var("CLASSIFIER_VOLUME_RATIO_HI")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),

            price_cache_ttl_secs: env_u64("PRICE_CACHE_TTL_SECS", 300),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_resolve_per_type() {
        let thresholds = EventThresholds {
            large_swap: Decimal::from(500_000),
            large_transfer: Decimal::from(1_000_000),
            exchange_flow: Decimal::from(500_000),
            perp_trade: Decimal::from(250_000),
        };

        assert_eq!(
            thresholds.for_type(EventType::LargeSwap),
            Decimal::from(500_000)
        );
        assert_eq!(
            thresholds.for_type(EventType::PerpTrade),
            Decimal::from(250_000)
        );
    }
}
