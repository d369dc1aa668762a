pub mod evm_collector;
pub mod perp_collector;
pub mod utxo_collector;

use metrics::counter;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;

use crate::analytics::MetricsEngine;
use crate::broadcast::{Broadcaster, LiveEvent, LiveEventWallet};
use crate::config::EventThresholds;
use crate::db::{checkpoint_repo, event_repo, holding_repo, trade_repo, whale_repo};
use crate::models::{
    Chain, EventType, IngestionCheckpoint, NewEvent, NewHolding, NewTrade, Whale,
};
use crate::oracle::PriceOracle;

pub use evm_collector::EvmCollector;
pub use perp_collector::PerpCollector;
pub use utxo_collector::UtxoCollector;

/// Shared dependencies handed to every collector.
#[derive(Clone)]
pub struct CollectorDeps {
    pub pool: sqlx::PgPool,
    pub oracle: Arc<PriceOracle>,
    pub engine: Arc<MetricsEngine>,
    pub broadcaster: Arc<Broadcaster>,
    pub thresholds: EventThresholds,
}

/// Event a normalized trade would emit, pending the USD threshold check at
/// commit time.
#[derive(Debug, Clone)]
pub struct PendingEvent {
    pub event_type: EventType,
    pub summary: String,
    pub details: serde_json::Value,
}

#[derive(Debug)]
pub struct BatchItem {
    pub trade: NewTrade,
    pub event: Option<PendingEvent>,
}

/// One wallet's normalized output for a tick or backfill pass.
#[derive(Debug)]
pub struct WalletBatch {
    pub items: Vec<BatchItem>,
    pub checkpoint: IngestionCheckpoint,
    /// Perp position snapshot replacing the wallet's holdings, when the
    /// source provides one.
    pub holdings: Option<Vec<NewHolding>>,
}

impl WalletBatch {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.holdings.is_none()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CommitStats {
    pub trades: usize,
    pub events: usize,
}

/// Persist one wallet's batch atomically and fan out its qualifying events.
///
/// Trades are sorted oldest → newest and deduped by tx hash within the
/// batch, then upserted together with their events and the checkpoint
/// advance in a single transaction — a crash leaves either everything or an
/// untouched checkpoint, and the dedupe absorbs the replay. Events are
/// broadcast only after the commit; the incremental metrics update runs
/// last.
pub async fn commit_wallet_batch(
    deps: &CollectorDeps,
    whale: &Whale,
    chain: &Chain,
    mut batch: WalletBatch,
) -> anyhow::Result<CommitStats> {
    batch.items.sort_by_key(|item| item.trade.timestamp);

    let mut seen_hashes: HashSet<String> = HashSet::new();
    batch.items.retain(|item| match &item.trade.tx_hash {
        Some(hash) => seen_hashes.insert(hash.clone()),
        None => true,
    });

    let last_active = batch.items.last().map(|item| item.trade.timestamp);
    let mut stats = CommitStats::default();
    let mut published: Vec<LiveEvent> = Vec::new();

    let mut tx = deps.pool.begin().await?;

    for item in &batch.items {
        let (_, inserted) = trade_repo::upsert_trade(&mut *tx, &item.trade).await?;
        stats.trades += 1;

        // A replayed trade landed on its existing row: its event already
        // exists, so don't emit it again.
        if !inserted {
            continue;
        }

        let Some(pending) = &item.event else {
            continue;
        };
        // Threshold gate: only trades with a known USD value above the
        // per-type threshold produce an event. Unknown value never
        // broadcasts.
        let Some(value) = item.trade.value_usd else {
            continue;
        };
        let threshold = deps.thresholds.for_type(pending.event_type);
        if value.abs() <= threshold {
            continue;
        }

        let event = NewEvent {
            whale_id: whale.id,
            chain_id: chain.id,
            timestamp: item.trade.timestamp,
            event_type: pending.event_type,
            summary: pending.summary.clone(),
            value_usd: Some(value),
            tx_hash: item.trade.tx_hash.clone(),
            details: pending.details.clone(),
        };
        let inserted = event_repo::insert_event(&mut *tx, &event).await?;
        stats.events += 1;

        published.push(LiveEvent {
            id: inserted
                .tx_hash
                .clone()
                .unwrap_or_else(|| inserted.id.to_string()),
            timestamp: inserted.timestamp,
            chain: chain.slug.clone(),
            event_type: pending.event_type.as_str().to_string(),
            wallet: LiveEventWallet {
                address: whale.address.clone(),
                chain: chain.slug.clone(),
                label: whale.first_label(),
            },
            summary: pending.summary.clone(),
            value_usd: {
                use rust_decimal::prelude::ToPrimitive;
                value.to_f64().unwrap_or(0.0)
            },
            tx_hash: inserted.tx_hash.clone(),
            details: pending.details.clone(),
        });
    }

    if let Some(holdings) = &batch.holdings {
        holding_repo::replace_holdings(&mut *tx, whale.id, holdings).await?;
    }

    if let Some(ts) = last_active {
        whale_repo::touch_last_active(&mut *tx, whale.id, ts).await?;
    }

    checkpoint_repo::advance_checkpoint(&mut *tx, &batch.checkpoint).await?;

    tx.commit().await?;

    // Fan-out strictly after commit so subscribers never see an event whose
    // trade could still roll back.
    for event in &published {
        deps.broadcaster.publish(event);
    }

    counter!("trades_persisted_total").increment(stats.trades as u64);
    counter!("events_persisted_total").increment(stats.events as u64);

    if stats.trades > 0 {
        if let Err(e) = deps.engine.incremental_update(whale.id).await {
            tracing::warn!(
                address = %whale.address,
                error = %e,
                "Incremental metrics update failed after batch"
            );
        }
    }

    Ok(stats)
}

/// Exponential backoff state shared by the collector loops. Ticks that fail
/// on upstream/rate-limit errors stretch the next sleep; a clean tick
/// resets it.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl Backoff {
    pub fn new(base_secs: u64) -> Self {
        Self {
            base_secs,
            current_secs: base_secs,
            max_secs: base_secs.saturating_mul(16).max(base_secs),
        }
    }

    pub fn next_delay_secs(&self) -> u64 {
        self.current_secs
    }

    pub fn failure(&mut self) {
        self.current_secs = (self.current_secs * 2).min(self.max_secs);
    }

    pub fn success(&mut self) {
        self.current_secs = self.base_secs;
    }
}

/// True once the shutdown signal has fired.
pub fn shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(15);
        assert_eq!(backoff.next_delay_secs(), 15);

        backoff.failure();
        assert_eq!(backoff.next_delay_secs(), 30);
        backoff.failure();
        backoff.failure();
        backoff.failure();
        backoff.failure();
        backoff.failure();
        assert_eq!(backoff.next_delay_secs(), 240); // capped at 16×

        backoff.success();
        assert_eq!(backoff.next_delay_secs(), 15);
    }
}
