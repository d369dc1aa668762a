use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::SourceError;

/// Upstream asset ids for the symbols we track. Unknown symbols fall back to
/// the lowercased symbol, which covers most listed assets.
const SYMBOL_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("SOL", "solana"),
    ("USDC", "usd-coin"),
    ("USDT", "tether"),
    ("WBTC", "wrapped-bitcoin"),
    ("WETH", "weth"),
    ("LINK", "chainlink"),
    ("UNI", "uniswap"),
    ("ARB", "arbitrum"),
    ("OP", "optimism"),
];

pub fn upstream_id(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    SYMBOL_IDS
        .iter()
        .find(|(sym, _)| *sym == upper)
        .map(|(_, id)| (*id).to_string())
        .unwrap_or_else(|| symbol.to_lowercase())
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    #[serde(default)]
    prices: Vec<(i64, f64)>,
}

/// Thin client for the spot/historical price upstream.
#[derive(Debug, Clone)]
pub struct PriceApiClient {
    http: Client,
    base_url: String,
}

impl PriceApiClient {
    pub fn new(base_url: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Spot USD prices for a set of symbols, keyed by uppercase symbol.
    /// Symbols the upstream doesn't know are simply absent from the map.
    pub async fn spot_prices(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, SourceError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<String> = symbols.iter().map(|s| upstream_id(s)).collect();
        let url = format!("{}/simple/price", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("ids", ids.join(",")), ("vs_currencies", "usd".into())])
            .send()
            .await?
            .error_for_status()?;

        let body: HashMap<String, HashMap<String, f64>> = resp.json().await?;

        let mut out = HashMap::new();
        for symbol in symbols {
            let id = upstream_id(symbol);
            if let Some(price) = body.get(&id).and_then(|m| m.get("usd")) {
                if let Ok(decimal) = Decimal::try_from(*price) {
                    out.insert(symbol.to_uppercase(), decimal);
                }
            }
        }

        Ok(out)
    }

    /// Historical USD price points within `[from, to]`, oldest first.
    pub async fn price_range(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, Decimal)>, SourceError> {
        let id = upstream_id(symbol);
        let url = format!("{}/coins/{}/market_chart/range", self.base_url, id);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("vs_currency", "usd".to_string()),
                ("from", from.timestamp().to_string()),
                ("to", to.timestamp().to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: RangeResponse = resp.json().await?;

        let mut points = Vec::with_capacity(body.prices.len());
        for (ms, price) in body.prices {
            let Some(ts) = DateTime::from_timestamp_millis(ms) else {
                continue;
            };
            let Ok(decimal) = Decimal::try_from(price) else {
                continue;
            };
            points.push((ts, decimal));
        }
        points.sort_by_key(|(ts, _)| *ts);

        Ok(points)
    }
}
