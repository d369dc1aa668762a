use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

/// A `(timestamp, price)` point from the price_history table.
pub type PricePoint = (DateTime<Utc>, Decimal);

/// Bulk-upsert price points for one asset. Conflicting timestamps keep the
/// newest price, so re-fetched candles are harmless.
pub async fn bulk_upsert_prices(
    pool: &PgPool,
    asset_symbol: &str,
    points: &[PricePoint],
) -> anyhow::Result<u64> {
    let mut written = 0u64;
    for (timestamp, price) in points {
        let result = sqlx::query(
            r#"
            INSERT INTO price_history (asset_symbol, timestamp, price_usd)
            VALUES ($1, $2, $3)
            ON CONFLICT (asset_symbol, timestamp)
            DO UPDATE SET price_usd = EXCLUDED.price_usd
            "#,
        )
        .bind(asset_symbol.to_uppercase())
        .bind(timestamp)
        .bind(price)
        .execute(pool)
        .await?;
        written += result.rows_affected();
    }

    Ok(written)
}

/// Ordered series within `[from, to]`.
pub async fn series(
    pool: &PgPool,
    asset_symbol: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> anyhow::Result<Vec<PricePoint>> {
    let rows: Vec<(DateTime<Utc>, Option<Decimal>)> = sqlx::query_as(
        r#"
        SELECT timestamp, price_usd FROM price_history
        WHERE asset_symbol = $1 AND timestamp >= $2 AND timestamp <= $3
        ORDER BY timestamp ASC
        "#,
    )
    .bind(asset_symbol.to_uppercase())
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(ts, price)| price.map(|p| (ts, p)))
        .collect())
}

/// Nearest known points on either side of `ts`, for interpolation.
pub async fn surrounding_points(
    pool: &PgPool,
    asset_symbol: &str,
    ts: DateTime<Utc>,
) -> anyhow::Result<(Option<PricePoint>, Option<PricePoint>)> {
    let before: Option<(DateTime<Utc>, Option<Decimal>)> = sqlx::query_as(
        r#"
        SELECT timestamp, price_usd FROM price_history
        WHERE asset_symbol = $1 AND timestamp <= $2 AND price_usd IS NOT NULL
        ORDER BY timestamp DESC
        LIMIT 1
        "#,
    )
    .bind(asset_symbol.to_uppercase())
    .bind(ts)
    .fetch_optional(pool)
    .await?;

    let after: Option<(DateTime<Utc>, Option<Decimal>)> = sqlx::query_as(
        r#"
        SELECT timestamp, price_usd FROM price_history
        WHERE asset_symbol = $1 AND timestamp >= $2 AND price_usd IS NOT NULL
        ORDER BY timestamp ASC
        LIMIT 1
        "#,
    )
    .bind(asset_symbol.to_uppercase())
    .bind(ts)
    .fetch_optional(pool)
    .await?;

    let unwrap = |row: Option<(DateTime<Utc>, Option<Decimal>)>| {
        row.and_then(|(ts, price)| price.map(|p| (ts, p)))
    };

    Ok((unwrap(before), unwrap(after)))
}
