use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use uuid::Uuid;

use crate::db::backtest_repo;
use crate::models::{BacktestRun, CopierSessionRow, Whale};
use crate::sources::perp::{self, PerpFill, PerpInfoClient};

const ERRORS_RING_CAP: usize = 50;

#[derive(Debug)]
struct LiveSession {
    id: i64,
    whale_id: Uuid,
    address: String,
    position_pct: f64,
    leverage: Decimal,
    fee_rate: Decimal,
    slippage_rate: Decimal,
    asset_filter: Option<Vec<String>>,
    last_seen_fill: Option<i64>,
    processed: i32,
    shadow_equity: Decimal,
    /// Whale positions open before the session started. Closes against
    /// these are old business and are not copied.
    initial_positions: HashMap<String, Decimal>,
    notifications: Vec<String>,
    errors: Vec<String>,
    active: bool,
}

/// Live shadow-copy sessions: polls a whale's new fills every second and
/// applies the backtest's sizing and cost model against a simulated equity,
/// recording outcomes without submitting real orders. Session state is
/// persisted every pass so clients can reconnect and resume.
pub struct CopierManager {
    pool: PgPool,
    client: PerpInfoClient,
    sessions: Mutex<HashMap<i64, LiveSession>>,
    poll_interval: Duration,
}

impl CopierManager {
    pub fn new(pool: PgPool, client: PerpInfoClient) -> Self {
        Self {
            pool,
            client,
            sessions: Mutex::new(HashMap::new()),
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Start a session for a whale using a stored backtest run as the
    /// sizing preset. The fill cursor is seeded to session start so history
    /// is never replayed, and pre-session open positions are recorded so
    /// their closes are skipped.
    pub async fn start_session(
        &self,
        whale: &Whale,
        run: &BacktestRun,
        position_pct_override: Option<f64>,
    ) -> anyhow::Result<CopierSessionRow> {
        let mut notifications: Vec<String> = Vec::new();

        // Seed the cursor to now so historical fills are never replayed.
        let last_seen = Some(chrono::Utc::now().timestamp_millis());
        if let Some(ts) = last_seen {
            notifications.push(format!("skipping historical fills up to {ts}"));
        }

        let initial_positions: HashMap<String, Decimal> =
            match self.client.clearinghouse_state(&whale.address).await {
                Ok(state) => state
                    .positions()
                    .into_iter()
                    .map(|p| (p.coin.to_uppercase(), p.szi))
                    .collect(),
                Err(_) => HashMap::new(),
            };
        if !initial_positions.is_empty() {
            let mut coins: Vec<&str> =
                initial_positions.keys().map(String::as_str).collect();
            coins.sort_unstable();
            notifications.push(format!(
                "detected pre-session open positions: {}",
                coins.join(", ")
            ));
        }

        let position_pct = position_pct_override
            .or(run.position_size_pct)
            .unwrap_or(5.0)
            .clamp(0.0, 200.0);

        let row = backtest_repo::insert_session(
            &self.pool,
            whale.id,
            Some(run.id),
            Some(position_pct),
            last_seen,
            &notifications,
        )
        .await?;

        let session = LiveSession {
            id: row.id,
            whale_id: whale.id,
            address: whale.address.clone(),
            position_pct,
            leverage: run.leverage.unwrap_or(Decimal::ONE),
            fee_rate: Decimal::from(run.fee_bps.unwrap_or(10).max(0)) / Decimal::from(10_000),
            slippage_rate: Decimal::from(run.slippage_bps.unwrap_or(10).max(0))
                / Decimal::from(10_000),
            asset_filter: run.asset_filter(),
            last_seen_fill: last_seen,
            processed: 0,
            shadow_equity: run.initial_deposit_usd.unwrap_or(Decimal::from(1_000)),
            initial_positions,
            notifications,
            errors: Vec::new(),
            active: true,
        };

        self.sessions.lock().await.insert(row.id, session);
        tracing::info!(
            session_id = row.id,
            address = %whale.address,
            position_pct,
            "Copier session started (shadow mode)"
        );

        Ok(row)
    }

    pub async fn stop_session(&self, session_id: i64) -> anyhow::Result<bool> {
        let stopped = backtest_repo::deactivate_session(&self.pool, session_id).await?;
        if let Some(session) = self.sessions.lock().await.get_mut(&session_id) {
            session.active = false;
        }
        Ok(stopped)
    }

    pub async fn session_status(&self, session_id: i64) -> anyhow::Result<Option<CopierSessionRow>> {
        backtest_repo::get_session(&self.pool, session_id).await
    }

    pub async fn list_active(&self, whale_id: Option<Uuid>) -> anyhow::Result<Vec<CopierSessionRow>> {
        backtest_repo::list_active_sessions(&self.pool, whale_id).await
    }

    /// Stop every session owned by a whale (deletion path). Covers sessions
    /// this process never loaded into memory.
    pub async fn stop_sessions_for_whale(&self, whale_id: Uuid) -> anyhow::Result<()> {
        let rows = backtest_repo::list_active_sessions(&self.pool, Some(whale_id)).await?;
        for row in rows {
            self.stop_session(row.id).await?;
        }
        Ok(())
    }

    /// Poll loop. One second cadence; sessions with nothing new are cheap.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Copier manager started");
        loop {
            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.poll_once().await;
        }
        tracing::info!("Copier manager stopped");
    }

    async fn poll_once(&self) {
        let ids: Vec<i64> = {
            let sessions = self.sessions.lock().await;
            sessions
                .values()
                .filter(|s| s.active)
                .map(|s| s.id)
                .collect()
        };

        for id in ids {
            if let Err(e) = self.poll_session(id).await {
                tracing::warn!(session_id = id, error = %e, "Copier session poll failed");
            }
        }
    }

    async fn poll_session(&self, session_id: i64) -> anyhow::Result<()> {
        let (address, since) = {
            let sessions = self.sessions.lock().await;
            let Some(session) = sessions.get(&session_id) else {
                return Ok(());
            };
            (session.address.clone(), session.last_seen_fill.unwrap_or(0))
        };

        let fills = match self.client.user_fills_since(&address, since, 2).await {
            Ok(fills) => fills,
            Err(e) => {
                let mut sessions = self.sessions.lock().await;
                if let Some(session) = sessions.get_mut(&session_id) {
                    push_ring(&mut session.errors, e.to_string());
                    self.persist(session).await?;
                }
                return Ok(());
            }
        };
        if fills.is_empty() {
            return Ok(());
        }

        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&session_id) else {
            return Ok(());
        };

        for fill in &fills {
            if session.last_seen_fill.map(|seen| fill.time <= seen).unwrap_or(false) {
                continue;
            }
            session.last_seen_fill = Some(
                session
                    .last_seen_fill
                    .map(|seen| seen.max(fill.time))
                    .unwrap_or(fill.time),
            );
            apply_fill(session, fill);
        }

        self.persist(session).await?;
        Ok(())
    }

    async fn persist(&self, session: &LiveSession) -> anyhow::Result<()> {
        backtest_repo::update_session_progress(
            &self.pool,
            session.id,
            session.processed,
            session.last_seen_fill,
            &serde_json::json!(session.notifications),
            &serde_json::json!(session.errors),
        )
        .await
    }

    /// Reload active sessions from the database after a restart. Cursors
    /// resume where they were persisted; pre-session positions are
    /// re-snapshotted.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let rows = backtest_repo::list_active_sessions(&self.pool, None).await?;
        let mut restored = 0usize;

        for row in rows {
            let Some(run_id) = row.run_id else { continue };
            let Some(run) = backtest_repo::get_run(&self.pool, run_id).await? else {
                continue;
            };
            let Some(whale) =
                crate::db::whale_repo::get_whale(&self.pool, row.whale_id).await?
            else {
                continue;
            };

            let initial_positions = match self.client.clearinghouse_state(&whale.address).await {
                Ok(state) => state
                    .positions()
                    .into_iter()
                    .map(|p| (p.coin.to_uppercase(), p.szi))
                    .collect(),
                Err(_) => HashMap::new(),
            };

            let notifications: Vec<String> = row
                .notifications
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default();
            let errors: Vec<String> = row
                .errors
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default();

            let session = LiveSession {
                id: row.id,
                whale_id: row.whale_id,
                address: whale.address.clone(),
                position_pct: row.position_size_pct.or(run.position_size_pct).unwrap_or(5.0),
                leverage: run.leverage.unwrap_or(Decimal::ONE),
                fee_rate: Decimal::from(run.fee_bps.unwrap_or(10).max(0)) / Decimal::from(10_000),
                slippage_rate: Decimal::from(run.slippage_bps.unwrap_or(10).max(0))
                    / Decimal::from(10_000),
                asset_filter: run.asset_filter(),
                last_seen_fill: row.last_seen_fill,
                processed: row.processed_trades,
                shadow_equity: run.initial_deposit_usd.unwrap_or(Decimal::from(1_000)),
                initial_positions,
                notifications,
                errors,
                active: true,
            };
            self.sessions.lock().await.insert(row.id, session);
            restored += 1;
        }

        if restored > 0 {
            tracing::info!(sessions = restored, "Copier sessions restored");
        }
        Ok(restored)
    }
}

/// Apply one new whale fill to a session's shadow book.
fn apply_fill(session: &mut LiveSession, fill: &PerpFill) {
    let coin = fill.coin.to_uppercase();

    if let Some(filter) = &session.asset_filter {
        if !filter.iter().any(|a| a.eq_ignore_ascii_case(&coin)) {
            return;
        }
    }

    // Closes that only unwind a pre-session position are old business.
    if let Some(pre) = session.initial_positions.get_mut(&coin) {
        if !pre.is_zero() {
            let signed = perp::signed_size(fill);
            let reduces = (*pre > Decimal::ZERO && signed < Decimal::ZERO)
                || (*pre < Decimal::ZERO && signed > Decimal::ZERO);
            if reduces {
                *pre += signed;
                session.notifications.push(format!(
                    "ignored close for pre-session position {} (remaining {})",
                    coin,
                    pre.normalize()
                ));
                return;
            }
        }
    }

    let whale_notional = (fill.sz.abs() * fill.px).abs();
    let pct = Decimal::try_from(session.position_pct / 100.0).unwrap_or(Decimal::ZERO);
    let mut notional = session.shadow_equity * pct * session.leverage;

    if notional > session.shadow_equity * session.leverage {
        notional = session.shadow_equity * session.leverage;
    }
    if notional <= Decimal::ZERO {
        session
            .notifications
            .push(format!("sized down: insufficient equity for {coin}"));
        return;
    }

    let fee = notional * session.fee_rate;
    let slip = notional * session.slippage_rate;

    // Realize the whale's reported PnL scaled to our copy size; entries only
    // pay costs.
    let scaled_pnl = match fill.closed_pnl {
        Some(pnl) if !whale_notional.is_zero() => pnl * notional / whale_notional,
        _ => Decimal::ZERO,
    };
    session.shadow_equity += scaled_pnl - fee - slip;
    session.processed += 1;

    if session.shadow_equity <= Decimal::ZERO {
        session
            .notifications
            .push("shadow equity exhausted".to_string());
    }

    tracing::debug!(
        session_id = session.id,
        coin = %coin,
        notional = %notional,
        equity = %session.shadow_equity,
        pnl = %scaled_pnl.to_f64().unwrap_or(0.0),
        "Shadow copy applied"
    );
}

fn push_ring(ring: &mut Vec<String>, entry: String) {
    ring.push(entry);
    if ring.len() > ERRORS_RING_CAP {
        let overflow = ring.len() - ERRORS_RING_CAP;
        ring.drain(..overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn session() -> LiveSession {
        LiveSession {
            id: 1,
            whale_id: Uuid::nil(),
            address: "0xwhale".into(),
            position_pct: 10.0,
            leverage: Decimal::ONE,
            fee_rate: dec!(0.001),
            slippage_rate: dec!(0.001),
            asset_filter: None,
            last_seen_fill: None,
            processed: 0,
            shadow_equity: dec!(1000),
            initial_positions: HashMap::new(),
            notifications: Vec::new(),
            errors: Vec::new(),
            active: true,
        }
    }

    fn fill(coin: &str, dir: &str, sz: Decimal, px: Decimal, pnl: Option<Decimal>) -> PerpFill {
        PerpFill {
            coin: coin.into(),
            px,
            sz,
            side: None,
            time: 1_700_000_000_000,
            dir: Some(dir.into()),
            closed_pnl: pnl,
            hash: None,
            fee: None,
            oid: None,
            tid: None,
        }
    }

    #[test]
    fn entry_fill_pays_costs_only() {
        let mut s = session();
        apply_fill(&mut s, &fill("ETH", "Open Long", dec!(1), dec!(3000), None));

        assert_eq!(s.processed, 1);
        // 10% of 1000 = 100 notional; 10 bps fee + 10 bps slip = 0.2
        assert_eq!(s.shadow_equity, dec!(999.8));
    }

    #[test]
    fn close_fill_realizes_scaled_pnl() {
        let mut s = session();
        // Whale closes 1 ETH at 3000 (notional 3000) for +300; our copy is
        // 100 notional → +10 scaled, minus 0.2 costs.
        apply_fill(
            &mut s,
            &fill("ETH", "Close Long", dec!(1), dec!(3000), Some(dec!(300))),
        );

        assert_eq!(s.processed, 1);
        assert_eq!(s.shadow_equity, dec!(1009.8));
    }

    #[test]
    fn pre_session_close_is_ignored_and_unwinds() {
        let mut s = session();
        s.initial_positions.insert("ETH".into(), dec!(2));

        apply_fill(
            &mut s,
            &fill("ETH", "Close Long", dec!(2), dec!(3000), Some(dec!(500))),
        );

        assert_eq!(s.processed, 0);
        assert_eq!(s.shadow_equity, dec!(1000));
        assert_eq!(s.initial_positions.get("ETH"), Some(&Decimal::ZERO));
        assert!(s.notifications.iter().any(|n| n.contains("pre-session")));

        // Position cleared: the next close is copied normally.
        apply_fill(
            &mut s,
            &fill("ETH", "Close Long", dec!(1), dec!(3000), Some(dec!(300))),
        );
        assert_eq!(s.processed, 1);
    }

    #[test]
    fn asset_filter_skips_other_coins() {
        let mut s = session();
        s.asset_filter = Some(vec!["BTC".into()]);

        apply_fill(&mut s, &fill("ETH", "Open Long", dec!(1), dec!(3000), None));
        assert_eq!(s.processed, 0);

        apply_fill(&mut s, &fill("BTC", "Open Long", dec!(1), dec!(60000), None));
        assert_eq!(s.processed, 1);
    }

    #[test]
    fn error_ring_is_capped() {
        let mut ring = Vec::new();
        for i in 0..(ERRORS_RING_CAP + 25) {
            push_ring(&mut ring, format!("error {i}"));
        }
        assert_eq!(ring.len(), ERRORS_RING_CAP);
        assert_eq!(ring[0], "error 25");
    }
}
