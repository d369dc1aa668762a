use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{CurrentWalletMetrics, WalletMetricsDaily};

/// One day's computed snapshot, produced by the metrics engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub portfolio_value_usd: Option<Decimal>,
    pub roi_percent: f64,
    pub realized_pnl_usd: Decimal,
    pub unrealized_pnl_usd: Decimal,
    pub volume_1d_usd: Decimal,
    pub trades_1d: i32,
    pub win_rate_percent: Option<f64>,
}

pub async fn upsert_daily(
    conn: &mut PgConnection,
    whale_id: Uuid,
    snapshot: &DailySnapshot,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO wallet_metrics_daily
            (whale_id, date, portfolio_value_usd, roi_percent, realized_pnl_usd,
             unrealized_pnl_usd, volume_1d_usd, trades_1d, win_rate_percent)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (whale_id, date)
        DO UPDATE SET
            portfolio_value_usd = EXCLUDED.portfolio_value_usd,
            roi_percent = EXCLUDED.roi_percent,
            realized_pnl_usd = EXCLUDED.realized_pnl_usd,
            unrealized_pnl_usd = EXCLUDED.unrealized_pnl_usd,
            volume_1d_usd = EXCLUDED.volume_1d_usd,
            trades_1d = EXCLUDED.trades_1d,
            win_rate_percent = EXCLUDED.win_rate_percent
        "#,
    )
    .bind(whale_id)
    .bind(snapshot.date)
    .bind(snapshot.portfolio_value_usd)
    .bind(snapshot.roi_percent)
    .bind(snapshot.realized_pnl_usd)
    .bind(snapshot.unrealized_pnl_usd)
    .bind(snapshot.volume_1d_usd)
    .bind(snapshot.trades_1d)
    .bind(snapshot.win_rate_percent)
    .execute(conn)
    .await?;

    Ok(())
}

/// Full-rebuild write path: delete the whale's rows in `[from, to]` and
/// insert the replacement set in one pass.
pub async fn replace_daily_range(
    conn: &mut PgConnection,
    whale_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
    snapshots: &[DailySnapshot],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM wallet_metrics_daily WHERE whale_id = $1 AND date >= $2 AND date <= $3")
        .bind(whale_id)
        .bind(from)
        .bind(to)
        .execute(&mut *conn)
        .await?;

    for snapshot in snapshots {
        upsert_daily(&mut *conn, whale_id, snapshot).await?;
    }

    Ok(())
}

pub async fn daily_since(
    pool: &PgPool,
    whale_id: Uuid,
    since: NaiveDate,
) -> anyhow::Result<Vec<WalletMetricsDaily>> {
    let rows = sqlx::query_as::<_, WalletMetricsDaily>(
        r#"
        SELECT * FROM wallet_metrics_daily
        WHERE whale_id = $1 AND date >= $2
        ORDER BY date ASC
        "#,
    )
    .bind(whale_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn latest_daily_date(
    pool: &PgPool,
    whale_id: Uuid,
) -> anyhow::Result<Option<NaiveDate>> {
    let row: (Option<NaiveDate>,) =
        sqlx::query_as("SELECT MAX(date) FROM wallet_metrics_daily WHERE whale_id = $1")
            .bind(whale_id)
            .fetch_one(pool)
            .await?;

    Ok(row.0)
}

pub async fn get_current(
    pool: &PgPool,
    whale_id: Uuid,
) -> anyhow::Result<Option<CurrentWalletMetrics>> {
    let metrics = sqlx::query_as::<_, CurrentWalletMetrics>(
        "SELECT * FROM current_wallet_metrics WHERE whale_id = $1",
    )
    .bind(whale_id)
    .fetch_optional(pool)
    .await?;

    Ok(metrics)
}

/// Replace the latest snapshot, carrying the 30-day aggregates alongside the
/// daily figures.
pub async fn replace_current(
    conn: &mut PgConnection,
    whale_id: Uuid,
    snapshot: &DailySnapshot,
    volume_30d_usd: Decimal,
    trades_30d: i32,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO current_wallet_metrics
            (whale_id, portfolio_value_usd, roi_percent, realized_pnl_usd,
             unrealized_pnl_usd, volume_30d_usd, trades_30d, win_rate_percent, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        ON CONFLICT (whale_id)
        DO UPDATE SET
            portfolio_value_usd = EXCLUDED.portfolio_value_usd,
            roi_percent = EXCLUDED.roi_percent,
            realized_pnl_usd = EXCLUDED.realized_pnl_usd,
            unrealized_pnl_usd = EXCLUDED.unrealized_pnl_usd,
            volume_30d_usd = EXCLUDED.volume_30d_usd,
            trades_30d = EXCLUDED.trades_30d,
            win_rate_percent = EXCLUDED.win_rate_percent,
            updated_at = NOW()
        "#,
    )
    .bind(whale_id)
    .bind(snapshot.portfolio_value_usd)
    .bind(snapshot.roi_percent)
    .bind(snapshot.realized_pnl_usd)
    .bind(snapshot.unrealized_pnl_usd)
    .bind(volume_30d_usd)
    .bind(trades_30d)
    .bind(snapshot.win_rate_percent)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn delete_metrics_for_whale(
    conn: &mut PgConnection,
    whale_id: Uuid,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM wallet_metrics_daily WHERE whale_id = $1")
        .bind(whale_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM current_wallet_metrics WHERE whale_id = $1")
        .bind(whale_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}
