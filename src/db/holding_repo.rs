use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::{Holding, NewHolding};

pub async fn get_holdings(pool: &PgPool, whale_id: Uuid) -> anyhow::Result<Vec<Holding>> {
    let holdings = sqlx::query_as::<_, Holding>(
        "SELECT * FROM holdings WHERE whale_id = $1 ORDER BY value_usd DESC NULLS LAST",
    )
    .bind(whale_id)
    .fetch_all(pool)
    .await?;

    Ok(holdings)
}

/// Replace a whale's holdings wholesale with a fresh snapshot. Portfolio
/// percent is computed here from the snapshot's own totals.
pub async fn replace_holdings(
    conn: &mut PgConnection,
    whale_id: Uuid,
    holdings: &[NewHolding],
) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM holdings WHERE whale_id = $1")
        .bind(whale_id)
        .execute(&mut *conn)
        .await?;

    let total: Decimal = holdings
        .iter()
        .filter_map(|h| h.value_usd)
        .sum();

    for h in holdings {
        let portfolio_percent = match (h.value_usd, total.is_zero()) {
            (Some(value), false) => (value / total * Decimal::from(100)).to_f64(),
            _ => h.portfolio_percent,
        };

        sqlx::query(
            r#"
            INSERT INTO holdings
                (whale_id, asset_symbol, asset_name, chain_id, amount, value_usd, portfolio_percent)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(whale_id)
        .bind(&h.asset_symbol)
        .bind(&h.asset_name)
        .bind(h.chain_id)
        .bind(h.amount)
        .bind(h.value_usd)
        .bind(portfolio_percent)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Fill in cost-basis columns computed by the metrics engine.
pub async fn update_cost_basis(
    conn: &mut PgConnection,
    whale_id: Uuid,
    asset_symbol: &str,
    cost_basis_usd: Option<Decimal>,
    avg_unit_cost_usd: Option<Decimal>,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE holdings
        SET cost_basis_usd = $3, avg_unit_cost_usd = $4, updated_at = NOW()
        WHERE whale_id = $1 AND asset_symbol = $2
        "#,
    )
    .bind(whale_id)
    .bind(asset_symbol)
    .bind(cost_basis_usd)
    .bind(avg_unit_cost_usd)
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn delete_holdings_for_whale(
    conn: &mut PgConnection,
    whale_id: Uuid,
) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM holdings WHERE whale_id = $1")
        .bind(whale_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
