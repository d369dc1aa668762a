use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::EventType;

/// Database row for the events table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub whale_id: Uuid,
    pub chain_id: Option<i32>,
    pub timestamp: DateTime<Utc>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub event_type: String,
    pub summary: Option<String>,
    pub value_usd: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub details: Option<serde_json::Value>,
}

/// A derived event produced alongside a trade batch, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub whale_id: Uuid,
    pub chain_id: i32,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub summary: String,
    pub value_usd: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub details: serde_json::Value,
}
