use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{Event, NewEvent};

pub async fn insert_event(conn: &mut PgConnection, e: &NewEvent) -> anyhow::Result<Event> {
    let event = sqlx::query_as::<_, Event>(
        r#"
        INSERT INTO events (whale_id, chain_id, timestamp, type, summary, value_usd, tx_hash, details)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(e.whale_id)
    .bind(e.chain_id)
    .bind(e.timestamp)
    .bind(e.event_type.as_str())
    .bind(&e.summary)
    .bind(e.value_usd)
    .bind(&e.tx_hash)
    .bind(&e.details)
    .fetch_one(conn)
    .await?;

    Ok(event)
}

/// Event joined with its owning wallet and chain, shaped for the events API
/// and the live broadcast payload.
#[derive(Debug, Clone, FromRow)]
pub struct EventRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub summary: Option<String>,
    pub value_usd: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub details: Option<serde_json::Value>,
    pub whale_id: Uuid,
    pub address: String,
    pub chain_slug: String,
    pub labels: serde_json::Value,
}

pub async fn recent_events(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<EventRecord>> {
    let events = sqlx::query_as::<_, EventRecord>(
        r#"
        SELECT e.id, e.timestamp, e.type, e.summary, e.value_usd, e.tx_hash,
               e.details, e.whale_id, w.address, c.slug AS chain_slug, w.labels
        FROM events e
        JOIN whales w ON w.id = e.whale_id
        JOIN chains c ON c.id = e.chain_id
        ORDER BY e.timestamp DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(events)
}

pub async fn delete_events_for_whale(conn: &mut PgConnection, whale_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM events WHERE whale_id = $1")
        .bind(whale_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
