use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::models::{Chain, CurrentWalletMetrics, Whale};

/// Fetch a chain by slug (`evm`, `utxo`, `perp`). Chains are seeded by
/// migration; an unknown slug is a caller error, not a missing row to create.
pub async fn get_chain_by_slug(pool: &PgPool, slug: &str) -> anyhow::Result<Option<Chain>> {
    let chain = sqlx::query_as::<_, Chain>("SELECT * FROM chains WHERE slug = $1")
        .bind(slug.to_lowercase())
        .fetch_optional(pool)
        .await?;

    Ok(chain)
}

pub async fn get_chain(pool: &PgPool, id: i32) -> anyhow::Result<Option<Chain>> {
    let chain = sqlx::query_as::<_, Chain>("SELECT * FROM chains WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(chain)
}

/// Insert a new whale for `(chain, address)`. Fails on duplicate — callers
/// that tolerate existing rows should check first.
pub async fn create_whale(
    pool: &PgPool,
    chain_id: i32,
    address: &str,
    whale_type: Option<&str>,
    labels: &[String],
) -> anyhow::Result<Whale> {
    let whale = sqlx::query_as::<_, Whale>(
        r#"
        INSERT INTO whales (address, chain_id, type, labels, first_seen_at)
        VALUES ($1, $2, $3, $4, NOW())
        RETURNING *
        "#,
    )
    .bind(address)
    .bind(chain_id)
    .bind(whale_type)
    .bind(serde_json::json!(labels))
    .fetch_one(pool)
    .await?;

    Ok(whale)
}

pub async fn get_whale(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Whale>> {
    let whale = sqlx::query_as::<_, Whale>("SELECT * FROM whales WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(whale)
}

/// Resolve a whale by chain slug and case-insensitive address.
pub async fn get_whale_by_address(
    pool: &PgPool,
    chain_id: i32,
    address: &str,
) -> anyhow::Result<Option<Whale>> {
    let whale = sqlx::query_as::<_, Whale>(
        "SELECT * FROM whales WHERE chain_id = $1 AND LOWER(address) = LOWER($2)",
    )
    .bind(chain_id)
    .bind(address)
    .fetch_optional(pool)
    .await?;

    Ok(whale)
}

pub async fn list_whales_for_chain(pool: &PgPool, chain_id: i32) -> anyhow::Result<Vec<Whale>> {
    let whales =
        sqlx::query_as::<_, Whale>("SELECT * FROM whales WHERE chain_id = $1 ORDER BY created_at")
            .bind(chain_id)
            .fetch_all(pool)
            .await?;

    Ok(whales)
}

pub async fn list_all_whales(pool: &PgPool) -> anyhow::Result<Vec<Whale>> {
    let whales = sqlx::query_as::<_, Whale>("SELECT * FROM whales ORDER BY created_at")
        .fetch_all(pool)
        .await?;

    Ok(whales)
}

/// Update mutable whale attributes. `None` leaves the column untouched.
pub async fn update_whale(
    pool: &PgPool,
    id: Uuid,
    whale_type: Option<&str>,
    labels: Option<&[String]>,
) -> anyhow::Result<Option<Whale>> {
    let whale = sqlx::query_as::<_, Whale>(
        r#"
        UPDATE whales
        SET type = COALESCE($2, type),
            labels = COALESCE($3, labels),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(whale_type)
    .bind(labels.map(|l| serde_json::json!(l)))
    .fetch_optional(pool)
    .await?;

    Ok(whale)
}

pub async fn set_whale_type(pool: &PgPool, id: Uuid, whale_type: &str) -> anyhow::Result<()> {
    sqlx::query("UPDATE whales SET type = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(whale_type)
        .execute(pool)
        .await?;

    Ok(())
}

/// Append a label if the whale doesn't carry it yet.
pub async fn add_label(conn: &mut PgConnection, id: Uuid, label: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE whales
        SET labels = labels || to_jsonb(ARRAY[$2::text]), updated_at = NOW()
        WHERE id = $1 AND NOT labels @> to_jsonb(ARRAY[$2::text])
        "#,
    )
    .bind(id)
    .bind(label)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn touch_last_active(
    conn: &mut PgConnection,
    id: Uuid,
    ts: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE whales
        SET last_active_at = GREATEST(COALESCE(last_active_at, $2), $2), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(ts)
    .execute(conn)
    .await?;

    Ok(())
}

/// Delete a whale. Owned rows cascade at the database level.
pub async fn delete_whale(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM whales WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ---------------------------------------------------------------------------
// Filtered listing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct WhaleListFilters {
    pub chains: Vec<String>,
    pub whale_type: Option<String>,
    pub min_roi: Option<f64>,
    pub active_since: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhaleSort {
    Roi,
    RealizedPnl,
    Volume30d,
    LastActive,
}

impl WhaleSort {
    pub fn from_api_str(s: Option<&str>) -> Self {
        match s {
            Some("realized_pnl_usd") => WhaleSort::RealizedPnl,
            Some("volume_30d_usd") => WhaleSort::Volume30d,
            Some("last_active_at") => WhaleSort::LastActive,
            _ => WhaleSort::Roi,
        }
    }

    fn column(&self) -> &'static str {
        match self {
            WhaleSort::Roi => "m.roi_percent",
            WhaleSort::RealizedPnl => "m.realized_pnl_usd",
            WhaleSort::Volume30d => "m.volume_30d_usd",
            WhaleSort::LastActive => "w.last_active_at",
        }
    }
}

#[derive(Debug)]
pub struct WhaleListPage {
    pub items: Vec<(Whale, Option<CurrentWalletMetrics>, Chain)>,
    pub total: i64,
}

/// Filtered, sorted, offset-paginated whale listing joined with current
/// metrics and chain.
pub async fn list_whales(
    pool: &PgPool,
    filters: &WhaleListFilters,
    sort: WhaleSort,
    descending: bool,
    limit: i64,
    offset: i64,
) -> anyhow::Result<WhaleListPage> {
    let mut builder = QueryBuilder::new(
        r#"
        SELECT w.id, w.address, w.chain_id, w.type, w.labels,
               w.first_seen_at, w.last_active_at, w.created_at, w.updated_at,
               m.portfolio_value_usd, m.roi_percent, m.realized_pnl_usd,
               m.unrealized_pnl_usd, m.volume_30d_usd, m.trades_30d,
               m.win_rate_percent, m.updated_at AS metrics_updated_at,
               c.id AS c_id, c.slug AS c_slug, c.name AS c_name,
               COUNT(*) OVER () AS total
        FROM whales w
        JOIN chains c ON c.id = w.chain_id
        LEFT JOIN current_wallet_metrics m ON m.whale_id = w.id
        WHERE TRUE
        "#,
    );

    if !filters.chains.is_empty() {
        builder.push(" AND c.slug = ANY(");
        builder.push_bind(filters.chains.clone());
        builder.push(")");
    }
    if let Some(whale_type) = &filters.whale_type {
        builder.push(" AND w.type = ");
        builder.push_bind(whale_type.clone());
    }
    if let Some(min_roi) = filters.min_roi {
        builder.push(" AND m.roi_percent >= ");
        builder.push_bind(min_roi);
    }
    if let Some(active_since) = filters.active_since {
        builder.push(" AND w.last_active_at >= ");
        builder.push_bind(active_since);
    }
    if let Some(search) = &filters.search {
        let pattern = format!("%{}%", search.to_lowercase());
        builder.push(" AND (LOWER(w.address) LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" OR LOWER(w.labels::text) LIKE ");
        builder.push_bind(pattern);
        builder.push(")");
    }

    builder.push(" ORDER BY ");
    builder.push(sort.column());
    builder.push(if descending {
        " DESC NULLS LAST"
    } else {
        " ASC NULLS LAST"
    });
    builder.push(" LIMIT ");
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);

    let rows = builder.build().fetch_all(pool).await?;

    let mut total = 0i64;
    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        total = row.try_get("total")?;
        let whale = Whale {
            id: row.try_get("id")?,
            address: row.try_get("address")?,
            chain_id: row.try_get("chain_id")?,
            whale_type: row.try_get("type")?,
            labels: row.try_get("labels")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_active_at: row.try_get("last_active_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        };
        // current_wallet_metrics.updated_at is NOT NULL, so a null here means
        // the LEFT JOIN found no metrics row.
        let metrics_updated_at: Option<DateTime<Utc>> = row.try_get("metrics_updated_at")?;
        let metrics = metrics_updated_at.map(|updated_at| -> anyhow::Result<_> {
            Ok(CurrentWalletMetrics {
                whale_id: whale.id,
                portfolio_value_usd: row.try_get("portfolio_value_usd")?,
                roi_percent: row.try_get("roi_percent")?,
                realized_pnl_usd: row.try_get("realized_pnl_usd")?,
                unrealized_pnl_usd: row.try_get("unrealized_pnl_usd")?,
                volume_30d_usd: row.try_get("volume_30d_usd")?,
                trades_30d: row.try_get("trades_30d")?,
                win_rate_percent: row.try_get("win_rate_percent")?,
                updated_at: Some(updated_at),
            })
        });
        let metrics = metrics.transpose()?;
        let chain = Chain {
            id: row.try_get("c_id")?,
            slug: row.try_get("c_slug")?,
            name: row.try_get("c_name")?,
        };
        items.push((whale, metrics, chain));
    }

    Ok(WhaleListPage { items, total })
}

// ---------------------------------------------------------------------------
// Dashboard aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct DashboardCounts {
    pub total_tracked: i64,
    pub active_24h: i64,
    pub perp_whales: i64,
}

pub async fn dashboard_counts(pool: &PgPool) -> anyhow::Result<DashboardCounts> {
    let active_since = Utc::now() - Duration::hours(24);

    let total_tracked: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM whales")
        .fetch_one(pool)
        .await?;
    let active_24h: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM whales WHERE last_active_at >= $1")
            .bind(active_since)
            .fetch_one(pool)
            .await?;
    let perp_whales: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM whales w JOIN chains c ON c.id = w.chain_id WHERE c.slug = 'perp'",
    )
    .fetch_one(pool)
    .await?;

    Ok(DashboardCounts {
        total_tracked: total_tracked.0,
        active_24h: active_24h.0,
        perp_whales: perp_whales.0,
    })
}
