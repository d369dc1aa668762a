use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ingestion cursor per `(whale, source)`. Which fields are populated is
/// source-specific: block height for EVM, tx id for UTXO, fill time (ms
/// epoch) for perp.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IngestionCheckpoint {
    pub whale_id: Uuid,
    pub source: String,
    pub last_block_height: Option<i64>,
    pub last_tx_id: Option<String>,
    pub last_fill_time: Option<i64>,
    pub last_position_time: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl IngestionCheckpoint {
    pub fn empty(whale_id: Uuid, source: &str) -> Self {
        Self {
            whale_id,
            source: source.to_string(),
            last_block_height: None,
            last_tx_id: None,
            last_fill_time: None,
            last_position_time: None,
            updated_at: None,
        }
    }
}

/// Backfill job status per whale. One `running` row at a time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BackfillStatus {
    pub whale_id: Uuid,
    pub state: String,
    pub progress: f64,
    pub message: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}
