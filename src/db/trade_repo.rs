use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::models::{NewTrade, Trade};

use super::cursor::TradeCursor;

/// Insert or update a trade. Replayed records with the same
/// `(whale, tx_hash)` land on the existing row and refresh the fields the
/// source may have filled in late (realized PnL arrives after the fill on
/// the perp ledger). Trades without a tx hash always insert.
///
/// Returns the row plus whether it was freshly inserted — replays must not
/// re-emit events, so callers gate on the flag. (`xmax = 0` holds only for
/// rows created by this statement.)
pub async fn upsert_trade(
    conn: &mut PgConnection,
    t: &NewTrade,
) -> anyhow::Result<(Trade, bool)> {
    let row = sqlx::query(
        r#"
        INSERT INTO trades (
            whale_id, timestamp, chain_id, source, platform, direction,
            base_asset, quote_asset, amount_base, amount_quote, value_usd,
            pnl_usd, pnl_percent, open_price_usd, close_price_usd,
            tx_hash, external_url, catalog_version
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        ON CONFLICT (whale_id, tx_hash) WHERE tx_hash IS NOT NULL
        DO UPDATE SET
            value_usd = COALESCE(EXCLUDED.value_usd, trades.value_usd),
            pnl_usd = COALESCE(EXCLUDED.pnl_usd, trades.pnl_usd),
            pnl_percent = COALESCE(EXCLUDED.pnl_percent, trades.pnl_percent),
            open_price_usd = COALESCE(EXCLUDED.open_price_usd, trades.open_price_usd),
            close_price_usd = COALESCE(EXCLUDED.close_price_usd, trades.close_price_usd)
        RETURNING *, (xmax = 0) AS inserted
        "#,
    )
    .bind(t.whale_id)
    .bind(t.timestamp)
    .bind(t.chain_id)
    .bind(t.source.as_str())
    .bind(&t.platform)
    .bind(t.direction.as_str())
    .bind(&t.base_asset)
    .bind(&t.quote_asset)
    .bind(t.amount_base)
    .bind(t.amount_quote)
    .bind(t.value_usd)
    .bind(t.pnl_usd)
    .bind(t.pnl_percent)
    .bind(t.open_price_usd)
    .bind(t.close_price_usd)
    .bind(&t.tx_hash)
    .bind(&t.external_url)
    .bind(t.catalog_version)
    .fetch_one(conn)
    .await?;

    let inserted: bool = row.try_get("inserted")?;
    let trade = Trade::from_row(&row)?;
    Ok((trade, inserted))
}

/// All trades for a whale, oldest first. Metrics rebuilds and backtests
/// consume this ordering directly.
pub async fn list_trades_asc(pool: &PgPool, whale_id: Uuid) -> anyhow::Result<Vec<Trade>> {
    let trades = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE whale_id = $1 ORDER BY timestamp ASC, id ASC",
    )
    .bind(whale_id)
    .fetch_all(pool)
    .await?;

    Ok(trades)
}

pub async fn count_trades(pool: &PgPool, whale_id: Uuid) -> anyhow::Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades WHERE whale_id = $1")
        .bind(whale_id)
        .fetch_one(pool)
        .await?;

    Ok(row.0)
}

/// Sum of USD volume and trade count in a trailing window. Trades with an
/// unknown USD value count toward the trade count but not the volume.
pub async fn volume_and_count_since(
    pool: &PgPool,
    whale_id: Uuid,
    since: DateTime<Utc>,
) -> anyhow::Result<(Decimal, i64)> {
    let row: (Option<Decimal>, i64) = sqlx::query_as(
        "SELECT SUM(value_usd), COUNT(*) FROM trades WHERE whale_id = $1 AND timestamp >= $2",
    )
    .bind(whale_id)
    .bind(since)
    .fetch_one(pool)
    .await?;

    Ok((row.0.unwrap_or_default(), row.1))
}

/// USD volume across all whales in a trailing window (dashboard aggregate).
pub async fn total_volume_since(pool: &PgPool, since: DateTime<Utc>) -> anyhow::Result<Decimal> {
    let row: (Option<Decimal>,) =
        sqlx::query_as("SELECT SUM(value_usd) FROM trades WHERE timestamp >= $1")
            .bind(since)
            .fetch_one(pool)
            .await?;

    Ok(row.0.unwrap_or_default())
}

/// Distinct base assets a whale has traded, for backtest asset pickers.
pub async fn distinct_assets(pool: &PgPool, whale_id: Uuid) -> anyhow::Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT base_asset FROM trades
        WHERE whale_id = $1 AND base_asset IS NOT NULL
        ORDER BY base_asset
        "#,
    )
    .bind(whale_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Wipe all trades for a whale (perp reset path).
pub async fn delete_trades_for_whale(conn: &mut PgConnection, whale_id: Uuid) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM trades WHERE whale_id = $1")
        .bind(whale_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Cursor-paginated reads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TradeFilters {
    pub source: Option<String>,
    pub direction: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct TradePage {
    pub items: Vec<Trade>,
    pub next_cursor: Option<String>,
    pub total: i64,
}

/// Query trades for a whale ordered `timestamp DESC, id DESC`, resuming
/// strictly after `cursor` when present.
pub async fn query_trades(
    pool: &PgPool,
    whale_id: Uuid,
    filters: &TradeFilters,
    cursor: Option<TradeCursor>,
    limit: i64,
) -> anyhow::Result<TradePage> {
    let mut count_builder =
        QueryBuilder::new("SELECT COUNT(*) AS total FROM trades WHERE whale_id = ");
    count_builder.push_bind(whale_id);
    push_filters(&mut count_builder, filters);
    let total: i64 = count_builder
        .build()
        .fetch_one(pool)
        .await?
        .try_get("total")?;

    let mut builder = QueryBuilder::new("SELECT * FROM trades WHERE whale_id = ");
    builder.push_bind(whale_id);
    push_filters(&mut builder, filters);

    if let Some(cursor) = cursor {
        builder.push(" AND (timestamp < ");
        builder.push_bind(cursor.timestamp);
        builder.push(" OR (timestamp = ");
        builder.push_bind(cursor.timestamp);
        builder.push(" AND id < ");
        builder.push_bind(cursor.id);
        builder.push("))");
    }

    builder.push(" ORDER BY timestamp DESC, id DESC LIMIT ");
    builder.push_bind(limit + 1);

    let mut items: Vec<Trade> = builder
        .build_query_as::<Trade>()
        .fetch_all(pool)
        .await?;

    let has_more = items.len() as i64 > limit;
    items.truncate(limit as usize);

    let next_cursor = if has_more {
        items.last().map(|t| {
            TradeCursor {
                timestamp: t.timestamp,
                id: t.id,
            }
            .encode()
        })
    } else {
        None
    };

    Ok(TradePage {
        items,
        next_cursor,
        total,
    })
}

fn push_filters(builder: &mut QueryBuilder<'_, sqlx::Postgres>, filters: &TradeFilters) {
    if let Some(source) = &filters.source {
        builder.push(" AND source = ");
        builder.push_bind(source.clone());
    }
    if let Some(direction) = &filters.direction {
        builder.push(" AND direction = ");
        builder.push_bind(direction.clone());
    }
    if let Some(since) = filters.since {
        builder.push(" AND timestamp >= ");
        builder.push_bind(since);
    }
    if let Some(until) = filters.until {
        builder.push(" AND timestamp <= ");
        builder.push_bind(until);
    }
}
