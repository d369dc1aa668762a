use chrono::{DateTime, Duration, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::metrics_repo::{self, DailySnapshot};
use crate::db::{holding_repo, trade_repo, whale_repo};
use crate::models::{NewHolding, TradeDirection, Whale};
use crate::oracle::PriceOracle;

use super::cost_basis::LotBook;

#[derive(Debug, Default)]
struct Gate {
    running: bool,
    pending: bool,
}

/// Rebuilds ROI / portfolio-value series and current metrics from trade
/// history plus oracle prices.
///
/// Incremental updates (after a collector batch) and full rebuilds (from the
/// scheduler or a backfill) share one accounting pass — the incremental path
/// merely restricts which daily rows get written. Rebuilds for the same
/// whale are serialized through a per-whale gate: a request that arrives
/// mid-rebuild sets a pending flag and triggers exactly one follow-up run.
pub struct MetricsEngine {
    pool: PgPool,
    oracle: Arc<PriceOracle>,
    gates: Mutex<HashMap<Uuid, Gate>>,
}

impl MetricsEngine {
    pub fn new(pool: PgPool, oracle: Arc<PriceOracle>) -> Self {
        Self {
            pool,
            oracle,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Full rebuild: delete and replace the whole daily range.
    pub async fn full_rebuild(&self, whale_id: Uuid) -> anyhow::Result<bool> {
        self.rebuild_serialized(whale_id, RebuildScope::Full).await
    }

    /// Incremental update after a collector batch: appends/overwrites only
    /// dates at or after the latest existing daily row.
    pub async fn incremental_update(&self, whale_id: Uuid) -> anyhow::Result<bool> {
        let scope = match metrics_repo::latest_daily_date(&self.pool, whale_id).await? {
            Some(latest) => RebuildScope::From(latest),
            None => RebuildScope::Full,
        };
        self.rebuild_serialized(whale_id, scope).await
    }

    async fn rebuild_serialized(
        &self,
        whale_id: Uuid,
        scope: RebuildScope,
    ) -> anyhow::Result<bool> {
        {
            let mut gates = self.gates.lock().await;
            let gate = gates.entry(whale_id).or_default();
            if gate.running {
                gate.pending = true;
                return Ok(false);
            }
            gate.running = true;
        }

        let mut result = self.rebuild_once(whale_id, scope).await;

        loop {
            let run_again = {
                let mut gates = self.gates.lock().await;
                let gate = gates.entry(whale_id).or_default();
                if gate.pending {
                    gate.pending = false;
                    true
                } else {
                    gate.running = false;
                    false
                }
            };
            if !run_again {
                break;
            }
            // Coalesced follow-up runs always cover the full range; the
            // triggering batch may predate the incremental cutoff.
            result = self.rebuild_once(whale_id, RebuildScope::Full).await;
        }

        if let Err(e) = &result {
            tracing::error!(whale_id = %whale_id, error = %e, "Metrics rebuild failed");
        }
        result
    }

    async fn rebuild_once(&self, whale_id: Uuid, scope: RebuildScope) -> anyhow::Result<bool> {
        let Some(whale) = whale_repo::get_whale(&self.pool, whale_id).await? else {
            anyhow::bail!("whale {whale_id} not found");
        };
        let chain = whale_repo::get_chain(&self.pool, whale.chain_id).await?;
        let is_perp = chain.as_ref().map(|c| c.slug.as_str()) == Some("perp");

        let trades = trade_repo::list_trades_asc(&self.pool, whale_id).await?;
        if trades.is_empty() {
            return Ok(false);
        }

        let now = Utc::now();
        let today = now.date_naive();
        let first_date = trades[0].timestamp.date_naive();

        let mut book = LotBook::new();
        let mut price_cache: HashMap<(String, NaiveDate), Option<Decimal>> = HashMap::new();
        let mut snapshots: Vec<DailySnapshot> = Vec::new();
        let mut idx = 0usize;

        let mut date = first_date;
        while date <= today {
            let mut volume_1d = Decimal::ZERO;
            let mut trades_1d = 0i32;

            while idx < trades.len() && trades[idx].timestamp.date_naive() <= date {
                let trade = &trades[idx];
                idx += 1;

                let Some(direction) = TradeDirection::from_api_str(&trade.direction) else {
                    continue;
                };
                if let Some(asset) = trade.base_asset.as_deref() {
                    book.apply(
                        asset,
                        direction,
                        trade.amount_base,
                        trade.value_usd,
                        trade.pnl_usd,
                    );
                }
                trades_1d += 1;
                if let Some(value) = trade.value_usd {
                    volume_1d += value.abs();
                }

                // Yield at record boundaries so long rebuilds stay cancellable.
                if idx % 256 == 0 {
                    tokio::task::yield_now().await;
                }
            }

            let mark_at = end_of_day(date, now);
            let (portfolio_value, unrealized) = self
                .value_open_positions(&book, mark_at, date, &mut price_cache)
                .await?;

            snapshots.push(DailySnapshot {
                date,
                portfolio_value_usd: Some(portfolio_value),
                roi_percent: book.roi_percent(unrealized),
                realized_pnl_usd: book.realized_pnl_usd(),
                unrealized_pnl_usd: unrealized,
                volume_1d_usd: volume_1d,
                trades_1d,
                win_rate_percent: book.win_rate_percent(),
            });

            date = date.succ_opt().expect("date overflow");
        }

        let window_start = now - Duration::days(30);
        let mut volume_30d = Decimal::ZERO;
        let mut trades_30d = 0i32;
        for trade in &trades {
            if trade.timestamp >= window_start {
                trades_30d += 1;
                if let Some(value) = trade.value_usd {
                    volume_30d += value.abs();
                }
            }
        }

        let latest = snapshots.last().cloned().expect("at least one snapshot");

        let mut tx = self.pool.begin().await?;
        match scope {
            RebuildScope::Full => {
                metrics_repo::replace_daily_range(&mut *tx, whale_id, first_date, today, &snapshots)
                    .await?;
            }
            RebuildScope::From(cutoff) => {
                for snapshot in snapshots.iter().filter(|s| s.date >= cutoff) {
                    metrics_repo::upsert_daily(&mut *tx, whale_id, snapshot).await?;
                }
            }
        }
        metrics_repo::replace_current(&mut *tx, whale_id, &latest, volume_30d, trades_30d).await?;

        // For on-chain wallets the open lots are the holdings snapshot; the
        // perp collector owns holdings for perp wallets (positions snapshot
        // is the source of truth there).
        if !is_perp {
            self.write_derived_holdings(&mut *tx, &whale, &book, &mut price_cache, today, now)
                .await?;
        } else {
            for (asset, qty, cost) in book.open_positions() {
                let avg = cost.filter(|_| !qty.is_zero()).map(|c| c / qty);
                holding_repo::update_cost_basis(&mut *tx, whale_id, &asset, cost, avg).await?;
            }
        }
        tx.commit().await?;

        counter!("metrics_rebuilds_total").increment(1);
        tracing::debug!(
            whale_id = %whale_id,
            days = snapshots.len(),
            trades = trades.len(),
            "Wallet metrics rebuilt"
        );

        Ok(true)
    }

    async fn value_open_positions(
        &self,
        book: &LotBook,
        mark_at: DateTime<Utc>,
        date: NaiveDate,
        price_cache: &mut HashMap<(String, NaiveDate), Option<Decimal>>,
    ) -> anyhow::Result<(Decimal, Decimal)> {
        let mut portfolio_value = Decimal::ZERO;
        let mut unrealized = Decimal::ZERO;

        for (asset, qty, cost) in book.open_positions() {
            let key = (asset.clone(), date);
            let price = match price_cache.get(&key) {
                Some(cached) => *cached,
                None => {
                    let fetched = self.oracle.historical(&asset, mark_at).await?;
                    price_cache.insert(key, fetched);
                    fetched
                }
            };
            let Some(price) = price else {
                // Unknown price: the asset contributes to neither value nor
                // unrealized PnL for this day.
                continue;
            };
            let value = qty * price;
            portfolio_value += value;
            if let Some(cost) = cost {
                unrealized += value - cost;
            }
        }

        Ok((portfolio_value, unrealized))
    }

    async fn write_derived_holdings(
        &self,
        tx: &mut sqlx::PgConnection,
        whale: &Whale,
        book: &LotBook,
        price_cache: &mut HashMap<(String, NaiveDate), Option<Decimal>>,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut holdings = Vec::new();
        for (asset, qty, _) in book.open_positions() {
            let key = (asset.clone(), today);
            let price = match price_cache.get(&key) {
                Some(cached) => *cached,
                None => {
                    let fetched = self.oracle.historical(&asset, now).await?;
                    price_cache.insert(key, fetched);
                    fetched
                }
            };
            holdings.push(NewHolding {
                asset_symbol: asset.clone(),
                asset_name: Some(asset),
                chain_id: whale.chain_id,
                amount: Some(qty),
                value_usd: price.map(|p| qty * p),
                portfolio_percent: None,
            });
        }
        holding_repo::replace_holdings(&mut *tx, whale.id, &holdings).await?;

        for (asset, qty, cost) in book.open_positions() {
            let avg = cost.filter(|_| !qty.is_zero()).map(|c| c / qty);
            holding_repo::update_cost_basis(&mut *tx, whale.id, &asset, cost, avg).await?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum RebuildScope {
    Full,
    From(NaiveDate),
}

fn end_of_day(date: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
    let eod = date
        .and_hms_opt(23, 59, 59)
        .expect("valid time")
        .and_utc();
    eod.min(now)
}
