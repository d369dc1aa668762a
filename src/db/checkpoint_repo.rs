use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{BackfillState, BackfillStatus, IngestionCheckpoint};

pub async fn get_checkpoint(
    pool: &PgPool,
    whale_id: Uuid,
    source: &str,
) -> anyhow::Result<Option<IngestionCheckpoint>> {
    let checkpoint = sqlx::query_as::<_, IngestionCheckpoint>(
        "SELECT * FROM ingestion_checkpoints WHERE whale_id = $1 AND source = $2",
    )
    .bind(whale_id)
    .bind(source)
    .fetch_optional(pool)
    .await?;

    Ok(checkpoint)
}

/// Advance a checkpoint. Called inside the same transaction as the trade
/// batch that produced the new cursor; GREATEST keeps every field monotonic
/// even if a replayed batch reports an older position.
pub async fn advance_checkpoint(
    conn: &mut PgConnection,
    cp: &IngestionCheckpoint,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingestion_checkpoints
            (whale_id, source, last_block_height, last_tx_id, last_fill_time, last_position_time)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (whale_id, source)
        DO UPDATE SET
            last_block_height = GREATEST(
                COALESCE(EXCLUDED.last_block_height, ingestion_checkpoints.last_block_height),
                ingestion_checkpoints.last_block_height
            ),
            last_tx_id = COALESCE(EXCLUDED.last_tx_id, ingestion_checkpoints.last_tx_id),
            last_fill_time = GREATEST(
                COALESCE(EXCLUDED.last_fill_time, ingestion_checkpoints.last_fill_time),
                ingestion_checkpoints.last_fill_time
            ),
            last_position_time = GREATEST(
                COALESCE(EXCLUDED.last_position_time, ingestion_checkpoints.last_position_time),
                ingestion_checkpoints.last_position_time
            ),
            updated_at = NOW()
        "#,
    )
    .bind(cp.whale_id)
    .bind(&cp.source)
    .bind(cp.last_block_height)
    .bind(&cp.last_tx_id)
    .bind(cp.last_fill_time)
    .bind(cp.last_position_time)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn delete_checkpoint(
    conn: &mut PgConnection,
    whale_id: Uuid,
    source: &str,
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM ingestion_checkpoints WHERE whale_id = $1 AND source = $2")
        .bind(whale_id)
        .bind(source)
        .execute(conn)
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Backfill status
// ---------------------------------------------------------------------------

pub async fn get_backfill_status(
    pool: &PgPool,
    whale_id: Uuid,
) -> anyhow::Result<Option<BackfillStatus>> {
    let status = sqlx::query_as::<_, BackfillStatus>(
        "SELECT * FROM backfill_status WHERE whale_id = $1",
    )
    .bind(whale_id)
    .fetch_optional(pool)
    .await?;

    Ok(status)
}

pub async fn set_backfill_state(
    pool: &PgPool,
    whale_id: Uuid,
    state: BackfillState,
    progress: f64,
    message: Option<&str>,
) -> anyhow::Result<BackfillStatus> {
    let status = sqlx::query_as::<_, BackfillStatus>(
        r#"
        INSERT INTO backfill_status (whale_id, state, progress, message, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (whale_id)
        DO UPDATE SET state = $2, progress = $3, message = $4, updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(whale_id)
    .bind(state.as_str())
    .bind(progress.clamp(0.0, 100.0))
    .bind(message)
    .fetch_one(pool)
    .await?;

    Ok(status)
}

/// Progress update that never moves backwards.
pub async fn update_backfill_progress(
    pool: &PgPool,
    whale_id: Uuid,
    progress: f64,
    message: Option<&str>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE backfill_status
        SET progress = GREATEST(progress, $2),
            message = COALESCE($3, message),
            updated_at = NOW()
        WHERE whale_id = $1
        "#,
    )
    .bind(whale_id)
    .bind(progress.clamp(0.0, 100.0))
    .bind(message)
    .execute(pool)
    .await?;

    Ok(())
}
