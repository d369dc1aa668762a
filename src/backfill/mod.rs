use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use uuid::Uuid;

use crate::db::{
    checkpoint_repo, event_repo, holding_repo, metrics_repo, trade_repo, whale_repo,
};
use crate::ingestion::{CollectorDeps, EvmCollector, PerpCollector, UtxoCollector};
use crate::models::{BackfillState, BackfillStatus, Whale};

/// Time-based progress ramp: with no item count from the collector, progress
/// climbs toward this ceiling over `RAMP_SECS`, then jumps to 100 on
/// completion.
const RAMP_CEILING: f64 = 90.0;
const RAMP_SECS: f64 = 300.0;

/// Async per-wallet backfill and reset jobs.
///
/// Drives the same collector code paths the periodic ticks use, unbounded by
/// recency. At most one job runs per whale: a second start while one is
/// running is a no-op that returns the current status. State lives in the
/// `backfill_status` table; the in-process set only guards concurrency.
///
/// Cheap to clone: every field is a handle, and each job runs on its own
/// clone.
#[derive(Clone)]
pub struct BackfillOrchestrator {
    deps: CollectorDeps,
    evm: Option<Arc<EvmCollector>>,
    utxo: Arc<UtxoCollector>,
    perp: Arc<PerpCollector>,
    running: Arc<Mutex<HashSet<Uuid>>>,
    shutdown: watch::Receiver<bool>,
}

impl BackfillOrchestrator {
    pub fn new(
        deps: CollectorDeps,
        evm: Option<Arc<EvmCollector>>,
        utxo: Arc<UtxoCollector>,
        perp: Arc<PerpCollector>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            deps,
            evm,
            utxo,
            perp,
            running: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    /// Current status, `idle` for whales that never ran a backfill.
    pub async fn status(&self, whale_id: Uuid) -> anyhow::Result<BackfillStatus> {
        let status = checkpoint_repo::get_backfill_status(&self.deps.pool, whale_id).await?;
        Ok(status.unwrap_or(BackfillStatus {
            whale_id,
            state: BackfillState::Idle.as_str().into(),
            progress: 0.0,
            message: None,
            updated_at: None,
        }))
    }

    /// Start a backfill job. Returns immediately with the job's status; a
    /// concurrent start returns the running job's status untouched.
    pub async fn start_backfill(&self, whale: &Whale) -> anyhow::Result<BackfillStatus> {
        {
            let mut running = self.running.lock().await;
            if running.contains(&whale.id) {
                return self.status(whale.id).await;
            }
            running.insert(whale.id);
        }

        let status = checkpoint_repo::set_backfill_state(
            &self.deps.pool,
            whale.id,
            BackfillState::Running,
            0.0,
            Some("backfill: starting"),
        )
        .await?;

        let orchestrator = self.clone();
        let whale = whale.clone();
        tokio::spawn(async move {
            orchestrator.run_job(whale).await;
        });

        Ok(status)
    }

    /// Perp-only reset: wipe the whale's trades, events, holdings, metrics,
    /// and checkpoint, then backfill from scratch.
    pub async fn start_reset(&self, whale: &Whale) -> anyhow::Result<BackfillStatus> {
        let chain = whale_repo::get_chain(&self.deps.pool, whale.chain_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("chain {} not found", whale.chain_id))?;
        if chain.slug != "perp" {
            anyhow::bail!("reset is only supported for perp wallets");
        }

        {
            let running = self.running.lock().await;
            if running.contains(&whale.id) {
                drop(running);
                return self.status(whale.id).await;
            }
        }

        let mut tx = self.deps.pool.begin().await?;
        trade_repo::delete_trades_for_whale(&mut *tx, whale.id).await?;
        event_repo::delete_events_for_whale(&mut *tx, whale.id).await?;
        holding_repo::delete_holdings_for_whale(&mut *tx, whale.id).await?;
        metrics_repo::delete_metrics_for_whale(&mut *tx, whale.id).await?;
        checkpoint_repo::delete_checkpoint(&mut *tx, whale.id, "perp").await?;
        tx.commit().await?;

        tracing::info!(address = %whale.address, "Perp wallet wiped for reset");
        self.start_backfill(whale).await
    }

    async fn run_job(self, whale: Whale) {
        let pool = self.deps.pool.clone();
        let whale_id = whale.id;

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(f64, String)>();

        // Drain collector progress reports into the status row. The update
        // is monotonic at the SQL level, so the time ramp below can write
        // concurrently without moving progress backwards.
        let reporter_pool = pool.clone();
        let reporter = tokio::spawn(async move {
            while let Some((pct, message)) = progress_rx.recv().await {
                let _ = checkpoint_repo::update_backfill_progress(
                    &reporter_pool,
                    whale_id,
                    pct,
                    Some(&message),
                )
                .await;
            }
        });

        // Fallback heuristic when the collector can't report totals.
        let ramp_pool = pool.clone();
        let ramp = tokio::spawn(async move {
            let started = std::time::Instant::now();
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let pct = (5.0 + started.elapsed().as_secs_f64() / RAMP_SECS * RAMP_CEILING)
                    .min(RAMP_CEILING);
                let _ =
                    checkpoint_repo::update_backfill_progress(&ramp_pool, whale_id, pct, None)
                        .await;
            }
        });

        let mut shutdown = self.shutdown.clone();
        let result = tokio::select! {
            result = self.dispatch(&whale, progress_tx) => result,
            _ = shutdown.changed() => Err(anyhow::anyhow!("cancelled by shutdown")),
        };

        ramp.abort();
        reporter.abort();

        match result {
            Ok(backfilled) => {
                // A broken rebuild is an invariant failure and the whale's
                // metrics can't be trusted; surface it instead of reporting
                // success.
                if let Err(e) = self.deps.engine.full_rebuild(whale_id).await {
                    tracing::error!(whale_id = %whale_id, error = %e, "Post-backfill rebuild failed");
                    let _ = checkpoint_repo::set_backfill_state(
                        &pool,
                        whale_id,
                        BackfillState::Error,
                        RAMP_CEILING,
                        Some(&format!("metrics rebuild failed: {e}")),
                    )
                    .await;
                    self.running.lock().await.remove(&whale_id);
                    return;
                }
                let message = if backfilled {
                    "backfill: done"
                } else {
                    "backfill: completed with no data"
                };
                let _ = checkpoint_repo::set_backfill_state(
                    &pool,
                    whale_id,
                    BackfillState::Done,
                    100.0,
                    Some(message),
                )
                .await;
            }
            Err(e) => {
                tracing::error!(whale_id = %whale_id, error = %e, "Backfill failed");
                let current = checkpoint_repo::get_backfill_status(&pool, whale_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|s| s.progress)
                    .unwrap_or(0.0);
                let _ = checkpoint_repo::set_backfill_state(
                    &pool,
                    whale_id,
                    BackfillState::Error,
                    current,
                    Some(&format!("backfill: {e}")),
                )
                .await;
            }
        }

        self.running.lock().await.remove(&whale_id);
    }

    async fn dispatch(
        &self,
        whale: &Whale,
        progress: mpsc::UnboundedSender<(f64, String)>,
    ) -> anyhow::Result<bool> {
        let chain = whale_repo::get_chain(&self.deps.pool, whale.chain_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("chain {} not found", whale.chain_id))?;

        match chain.slug.as_str() {
            "evm" => match &self.evm {
                Some(evm) => evm.backfill_whale(whale, progress).await,
                None => anyhow::bail!("EVM RPC is not configured"),
            },
            "utxo" => self.utxo.backfill_whale(whale, progress).await,
            "perp" => self.perp.backfill_whale(whale, progress).await,
            other => anyhow::bail!("unknown chain slug {other}"),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_reaches_ceiling_and_stops() {
        // 5 + t/300·90, capped at 90
        let pct_at = |secs: f64| (5.0 + secs / RAMP_SECS * RAMP_CEILING).min(RAMP_CEILING);

        assert!(pct_at(0.0) >= 5.0);
        assert!(pct_at(150.0) > 45.0);
        assert_eq!(pct_at(600.0), RAMP_CEILING);
    }
}
