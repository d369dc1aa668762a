use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{BacktestRun, CopierSessionRow};

#[allow(clippy::too_many_arguments)]
pub async fn insert_run(pool: &PgPool, run: &BacktestRun) -> anyhow::Result<BacktestRun> {
    let inserted = sqlx::query_as::<_, BacktestRun>(
        r#"
        INSERT INTO backtest_runs (
            whale_id, initial_deposit_usd, position_size_pct, fee_bps, slippage_bps,
            leverage, asset_symbols, window_start, window_end,
            recommended_position_pct, gross_pnl_usd, net_pnl_usd, total_fees_usd,
            total_slippage_usd, roi_percent, max_drawdown_percent, max_drawdown_usd,
            trades_copied, win_rate_percent
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *
        "#,
    )
    .bind(run.whale_id)
    .bind(run.initial_deposit_usd)
    .bind(run.position_size_pct)
    .bind(run.fee_bps)
    .bind(run.slippage_bps)
    .bind(run.leverage)
    .bind(&run.asset_symbols)
    .bind(run.window_start)
    .bind(run.window_end)
    .bind(run.recommended_position_pct)
    .bind(run.gross_pnl_usd)
    .bind(run.net_pnl_usd)
    .bind(run.total_fees_usd)
    .bind(run.total_slippage_usd)
    .bind(run.roi_percent)
    .bind(run.max_drawdown_percent)
    .bind(run.max_drawdown_usd)
    .bind(run.trades_copied)
    .bind(run.win_rate_percent)
    .fetch_one(pool)
    .await?;

    Ok(inserted)
}

pub async fn get_run(pool: &PgPool, id: i64) -> anyhow::Result<Option<BacktestRun>> {
    let run = sqlx::query_as::<_, BacktestRun>("SELECT * FROM backtest_runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(run)
}

// ---------------------------------------------------------------------------
// Copier sessions
// ---------------------------------------------------------------------------

pub async fn insert_session(
    pool: &PgPool,
    whale_id: Uuid,
    run_id: Option<i64>,
    position_size_pct: Option<f64>,
    last_seen_fill: Option<i64>,
    notifications: &[String],
) -> anyhow::Result<CopierSessionRow> {
    let session = sqlx::query_as::<_, CopierSessionRow>(
        r#"
        INSERT INTO copier_sessions
            (whale_id, run_id, active, position_size_pct, last_seen_fill, notifications)
        VALUES ($1, $2, TRUE, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(whale_id)
    .bind(run_id)
    .bind(position_size_pct)
    .bind(last_seen_fill)
    .bind(serde_json::json!(notifications))
    .fetch_one(pool)
    .await?;

    Ok(session)
}

pub async fn get_session(pool: &PgPool, id: i64) -> anyhow::Result<Option<CopierSessionRow>> {
    let session =
        sqlx::query_as::<_, CopierSessionRow>("SELECT * FROM copier_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(session)
}

pub async fn list_active_sessions(
    pool: &PgPool,
    whale_id: Option<Uuid>,
) -> anyhow::Result<Vec<CopierSessionRow>> {
    let sessions = match whale_id {
        Some(whale_id) => {
            sqlx::query_as::<_, CopierSessionRow>(
                "SELECT * FROM copier_sessions WHERE active AND whale_id = $1 ORDER BY created_at",
            )
            .bind(whale_id)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, CopierSessionRow>(
                "SELECT * FROM copier_sessions WHERE active ORDER BY created_at",
            )
            .fetch_all(pool)
            .await?
        }
    };

    Ok(sessions)
}

/// Persist one poll pass's worth of session state.
pub async fn update_session_progress(
    pool: &PgPool,
    id: i64,
    processed_trades: i32,
    last_seen_fill: Option<i64>,
    notifications: &serde_json::Value,
    errors: &serde_json::Value,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE copier_sessions
        SET processed_trades = $2,
            last_seen_fill = COALESCE($3, last_seen_fill),
            notifications = $4,
            errors = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(processed_trades)
    .bind(last_seen_fill)
    .bind(notifications)
    .bind(errors)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn deactivate_session(pool: &PgPool, id: i64) -> anyhow::Result<bool> {
    let result = sqlx::query(
        "UPDATE copier_sessions SET active = FALSE, updated_at = NOW() WHERE id = $1 AND active",
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
