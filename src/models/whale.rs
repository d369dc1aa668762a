use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for the chains reference table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Chain {
    pub id: i32,
    pub slug: String,
    pub name: String,
}

/// Database row for the whales table. Identity is `(chain, address)`; the
/// UUID is assigned on first insert and owns every downstream row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Whale {
    pub id: Uuid,
    pub address: String,
    pub chain_id: i32,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub whale_type: Option<String>,
    pub labels: serde_json::Value,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Whale {
    /// Labels as a plain string vector (stored as a JSON array).
    pub fn label_list(&self) -> Vec<String> {
        self.labels
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn first_label(&self) -> Option<String> {
        self.label_list().into_iter().next()
    }
}

/// Block-explorer URL for a wallet, derived from its chain.
pub fn explorer_url(chain_slug: &str, address: &str) -> String {
    match chain_slug {
        "evm" => format!("https://etherscan.io/address/{address}"),
        "utxo" => format!("https://mempool.space/address/{address}"),
        "perp" => format!("https://app.hyperliquid.xyz/explorer/address/{address}"),
        _ => address.to_string(),
    }
}
