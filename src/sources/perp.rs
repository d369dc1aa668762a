use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::errors::SourceError;

/// A single fill from the perp ledger. Close fills report the direction in
/// `dir` ("Close Long" / "Close Short") and realized PnL in `closed_pnl`.
#[derive(Debug, Clone, Deserialize)]
pub struct PerpFill {
    pub coin: String,
    pub px: Decimal,
    pub sz: Decimal,
    #[serde(default)]
    pub side: Option<String>,
    pub time: i64,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default, rename = "closedPnl")]
    pub closed_pnl: Option<Decimal>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub fee: Option<Decimal>,
    #[serde(default)]
    pub oid: Option<i64>,
    #[serde(default)]
    pub tid: Option<i64>,
}

impl PerpFill {
    /// Stable dedupe key: prefer the tx hash, fall back to trade/order id.
    pub fn tx_key(&self) -> Option<String> {
        if let Some(hash) = &self.hash {
            if !hash.is_empty() && !hash.chars().all(|c| c == '0' || c == 'x') {
                return Some(hash.clone());
            }
        }
        self.tid
            .map(|tid| format!("tid:{tid}"))
            .or_else(|| self.oid.map(|oid| format!("oid:{oid}")))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarginSummary {
    #[serde(default, rename = "accountValue")]
    pub account_value: Option<Decimal>,
    #[serde(default, rename = "totalMarginUsed")]
    pub total_margin_used: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PerpPosition {
    pub coin: String,
    /// Signed size: positive long, negative short.
    pub szi: Decimal,
    #[serde(default, rename = "entryPx")]
    pub entry_px: Option<Decimal>,
    #[serde(default, rename = "positionValue")]
    pub position_value: Option<Decimal>,
    #[serde(default, rename = "unrealizedPnl")]
    pub unrealized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
struct AssetPosition {
    position: PerpPosition,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearinghouseState {
    #[serde(default, rename = "marginSummary")]
    pub margin_summary: MarginSummary,
    #[serde(default, rename = "assetPositions")]
    asset_positions: Vec<AssetPosition>,
}

impl ClearinghouseState {
    /// Open positions (zero-size entries dropped).
    pub fn positions(&self) -> Vec<&PerpPosition> {
        self.asset_positions
            .iter()
            .map(|ap| &ap.position)
            .filter(|p| !p.szi.is_zero())
            .collect()
    }
}

/// Non-trade ledger movement (deposit / withdraw).
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerUpdate {
    pub time: i64,
    #[serde(default)]
    pub hash: Option<String>,
    pub delta: LedgerDelta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerDelta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub usdc: Option<Decimal>,
}

/// Client for the perpetuals exchange info API. All queries are POSTs with a
/// `type` discriminator against a single endpoint.
#[derive(Debug, Clone)]
pub struct PerpInfoClient {
    http: Client,
    url: String,
}

impl PerpInfoClient {
    pub fn new(url: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client");
        Self {
            http,
            url: url.to_string(),
        }
    }

    /// Fills with `time > start_ms`, paginated forward until exhausted.
    /// Returned oldest first.
    pub async fn user_fills_since(
        &self,
        address: &str,
        start_ms: i64,
        max_pages: usize,
    ) -> Result<Vec<PerpFill>, SourceError> {
        let mut fills: Vec<PerpFill> = Vec::new();
        let mut cursor = start_ms;

        for _ in 0..max_pages {
            let body = json!({
                "type": "userFillsByTime",
                "user": address,
                "startTime": cursor + 1,
            });
            let page: Vec<PerpFill> = self.post(&body).await?;
            if page.is_empty() {
                break;
            }
            let page_max = page.iter().map(|f| f.time).max().unwrap_or(cursor);
            let page_len = page.len();
            fills.extend(page);
            // The API caps pages at 2000 fills; a short page means we're done.
            if page_len < 2000 || page_max <= cursor {
                break;
            }
            cursor = page_max;
        }

        fills.sort_by_key(|f| f.time);
        Ok(fills)
    }

    pub async fn clearinghouse_state(
        &self,
        address: &str,
    ) -> Result<ClearinghouseState, SourceError> {
        let body = json!({"type": "clearinghouseState", "user": address});
        self.post(&body).await
    }

    /// Deposits and withdrawals newer than `start_ms`, oldest first.
    pub async fn ledger_updates_since(
        &self,
        address: &str,
        start_ms: i64,
    ) -> Result<Vec<LedgerUpdate>, SourceError> {
        let body = json!({
            "type": "userNonFundingLedgerUpdates",
            "user": address,
            "startTime": start_ms + 1,
        });
        let mut updates: Vec<LedgerUpdate> = self.post(&body).await?;
        updates.sort_by_key(|u| u.time);
        Ok(updates)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        body: &serde_json::Value,
    ) -> Result<T, SourceError> {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

/// Map a fill to a trade direction from its `dir` string, falling back to
/// the aggressor side when the string is absent.
pub fn fill_direction(fill: &PerpFill) -> crate::models::TradeDirection {
    use crate::models::TradeDirection;

    let dir = fill.dir.as_deref().unwrap_or("").to_lowercase();
    if dir.contains("close") && dir.contains("short") {
        TradeDirection::CloseShort
    } else if dir.contains("close") && dir.contains("long") {
        TradeDirection::CloseLong
    } else if dir.contains("short") {
        TradeDirection::Short
    } else if dir.contains("long") {
        TradeDirection::Long
    } else if fill.side.as_deref() == Some("A") {
        // Ask-side aggressor without a dir string: treat as short entry.
        TradeDirection::Short
    } else {
        TradeDirection::Long
    }
}

/// Signed base size for a fill: close directions store negative size.
pub fn signed_size(fill: &PerpFill) -> Decimal {
    use crate::models::TradeDirection;

    match fill_direction(fill) {
        TradeDirection::CloseLong | TradeDirection::CloseShort => -fill.sz.abs(),
        _ => fill.sz.abs(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeDirection;
    use rust_decimal_macros::dec;

    fn fill(dir: Option<&str>, side: Option<&str>, sz: Decimal) -> PerpFill {
        PerpFill {
            coin: "ETH".into(),
            px: dec!(3000),
            sz,
            side: side.map(str::to_string),
            time: 1_700_000_000_000,
            dir: dir.map(str::to_string),
            closed_pnl: None,
            hash: None,
            fee: None,
            oid: None,
            tid: None,
        }
    }

    #[test]
    fn dir_string_wins_over_side() {
        assert_eq!(
            fill_direction(&fill(Some("Open Long"), Some("A"), dec!(1))),
            TradeDirection::Long
        );
        assert_eq!(
            fill_direction(&fill(Some("Close Short"), Some("B"), dec!(1))),
            TradeDirection::CloseShort
        );
    }

    #[test]
    fn closes_carry_negative_size() {
        let close = fill(Some("Close Long"), None, dec!(0.5));
        assert_eq!(signed_size(&close), dec!(-0.5));

        let open = fill(Some("Open Long"), None, dec!(0.5));
        assert_eq!(signed_size(&open), dec!(0.5));
    }

    #[test]
    fn tx_key_prefers_hash_then_tid() {
        let mut f = fill(None, None, dec!(1));
        f.hash = Some("0xabc123".into());
        f.tid = Some(42);
        assert_eq!(f.tx_key(), Some("0xabc123".into()));

        f.hash = None;
        assert_eq!(f.tx_key(), Some("tid:42".into()));

        f.tid = None;
        f.oid = Some(7);
        assert_eq!(f.tx_key(), Some("oid:7".into()));
    }
}
