use chrono::Utc;
use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::db::{checkpoint_repo, whale_repo};
use crate::errors::SourceError;
use crate::models::whale::explorer_url;
use crate::models::{
    Chain, EventType, IngestionCheckpoint, NewHolding, NewTrade, TradeDirection, TradeSource,
    Whale,
};
use crate::sources::perp::{self, LedgerUpdate, PerpFill, PerpInfoClient};

use super::{commit_wallet_batch, shutting_down, Backoff, BatchItem, CollectorDeps, PendingEvent, WalletBatch};

const SOURCE: &str = "perp";
const TICK_MAX_PAGES: usize = 20;
const BACKFILL_MAX_PAGES: usize = 50;

/// Perpetuals source collector. Ingests fills and ledger movements past the
/// checkpointed fill time and wholesale-replaces holdings from the
/// clearinghouse position snapshot.
///
/// Fills carry signed sizes (closes negative) and are the source of truth
/// for historical PnL; the position snapshot is the source of truth for the
/// open-positions view. The two are never mixed.
pub struct PerpCollector {
    deps: CollectorDeps,
    client: PerpInfoClient,
    chain: Chain,
}

impl PerpCollector {
    pub fn new(deps: CollectorDeps, client: PerpInfoClient, chain: Chain) -> Self {
        Self { deps, client, chain }
    }

    pub async fn run(self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs, "Perp collector started");
        let mut backoff = Backoff::new(interval_secs);

        loop {
            tokio::select! {
                _ = sleep(Duration::from_secs(backoff.next_delay_secs())) => {}
                _ = shutdown.changed() => {}
            }
            if shutting_down(&shutdown) {
                break;
            }

            let started = std::time::Instant::now();
            match self.tick(&shutdown).await {
                Ok(_) => {
                    histogram!("collector_tick_seconds").record(started.elapsed().as_secs_f64());
                    backoff.success();
                }
                Err(e) => {
                    backoff.failure();
                    tracing::warn!(error = %e, "Perp tick failed, backing off");
                }
            }
        }
        tracing::info!("Perp collector stopped");
    }

    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<usize> {
        let whales = whale_repo::list_whales_for_chain(&self.deps.pool, self.chain.id).await?;
        let mut persisted = 0usize;

        for whale in &whales {
            if shutting_down(shutdown) {
                break;
            }
            match self.process_wallet(whale, TICK_MAX_PAGES).await {
                Ok(count) => persisted += count,
                Err(e) => match e.downcast_ref::<SourceError>() {
                    Some(source_err) if source_err.ends_tick() => return Err(e),
                    _ => {
                        tracing::warn!(
                            address = %whale.address,
                            error = %e,
                            "Perp wallet pass failed, continuing"
                        );
                    }
                },
            }
        }

        Ok(persisted)
    }

    /// Ingest one wallet: fills + ledger since the checkpoint, then the
    /// position snapshot. The `perp` label is applied as a consequence of
    /// ingestion, never required up front.
    pub async fn process_wallet(&self, whale: &Whale, max_pages: usize) -> anyhow::Result<usize> {
        let checkpoint =
            checkpoint_repo::get_checkpoint(&self.deps.pool, whale.id, SOURCE).await?;
        let since_ms = checkpoint.as_ref().and_then(|cp| cp.last_fill_time).unwrap_or(0);

        let fills = self
            .client
            .user_fills_since(&whale.address, since_ms, max_pages)
            .await
            .map_err(anyhow::Error::from)?;
        let ledger = self
            .client
            .ledger_updates_since(&whale.address, since_ms)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(address = %whale.address, error = %e, "Perp ledger fetch failed");
                Vec::new()
            });

        let mut items: Vec<BatchItem> = Vec::new();
        let mut max_time = since_ms;

        for fill in &fills {
            max_time = max_time.max(fill.time);
            match self.normalize_fill(whale, fill) {
                Ok(item) => items.push(item),
                Err(e) => {
                    counter!("decode_errors_total", "source" => SOURCE).increment(1);
                    tracing::debug!(coin = %fill.coin, error = %e, "Skipping undecodable fill");
                }
            }
        }

        for update in &ledger {
            max_time = max_time.max(update.time);
            if let Some(item) = self.normalize_ledger_update(whale, update) {
                items.push(item);
            }
        }

        let now = Utc::now();
        let holdings = self.fetch_position_holdings(whale).await?;

        let batch = WalletBatch {
            items,
            checkpoint: IngestionCheckpoint {
                whale_id: whale.id,
                source: SOURCE.into(),
                last_block_height: None,
                last_tx_id: None,
                last_fill_time: Some(max_time),
                last_position_time: Some(now),
                updated_at: None,
            },
            holdings,
        };

        if batch.is_empty() && max_time == since_ms {
            return Ok(0);
        }

        let stats = commit_wallet_batch(&self.deps, whale, &self.chain, batch).await?;

        // Ingestion is what makes a wallet a perp wallet.
        let mut conn = self.deps.pool.acquire().await?;
        whale_repo::add_label(&mut *conn, whale.id, "perp").await?;

        Ok(stats.trades)
    }

    fn normalize_fill(&self, whale: &Whale, fill: &PerpFill) -> Result<BatchItem, SourceError> {
        let timestamp = chrono::DateTime::from_timestamp_millis(fill.time)
            .ok_or_else(|| SourceError::Decode("fill time".into()))?;

        let direction = perp::fill_direction(fill);
        let signed = perp::signed_size(fill);
        let value_usd = Some((fill.sz.abs() * fill.px).abs());

        let pnl_percent = fill.closed_pnl.and_then(|pnl| {
            let notional = fill.sz.abs() * fill.px;
            if notional.is_zero() {
                return None;
            }
            (pnl / notional * Decimal::from(100)).to_f64()
        });

        let is_close = matches!(
            direction,
            TradeDirection::CloseLong | TradeDirection::CloseShort
        );

        let trade = NewTrade {
            whale_id: whale.id,
            timestamp,
            chain_id: self.chain.id,
            source: TradeSource::Perp,
            platform: "perp".into(),
            direction,
            base_asset: Some(fill.coin.to_uppercase()),
            quote_asset: Some("USD".into()),
            // Signed: closes are stored negative, never as absolute values.
            amount_base: Some(signed),
            amount_quote: None,
            value_usd,
            pnl_usd: fill.closed_pnl,
            pnl_percent,
            open_price_usd: (!is_close).then_some(fill.px),
            close_price_usd: is_close.then_some(fill.px),
            tx_hash: fill.tx_key(),
            external_url: Some(explorer_url(&self.chain.slug, &whale.address)),
            catalog_version: None,
        };

        let event = PendingEvent {
            event_type: EventType::PerpTrade,
            summary: format!("Perp {} {}", fill.coin.to_uppercase(), direction),
            details: json!({
                "tid": fill.tid,
                "oid": fill.oid,
                "fee": fill.fee,
                "px": fill.px,
                "sz": signed,
            }),
        };

        Ok(BatchItem {
            trade,
            event: Some(event),
        })
    }

    fn normalize_ledger_update(&self, whale: &Whale, update: &LedgerUpdate) -> Option<BatchItem> {
        let kind = update.delta.kind.to_lowercase();
        let direction = if kind.contains("withdraw") {
            TradeDirection::Withdraw
        } else if kind.contains("deposit") {
            TradeDirection::Deposit
        } else {
            return None;
        };

        let timestamp = chrono::DateTime::from_timestamp_millis(update.time)?;
        let amount = update.delta.usdc?.abs();
        if amount.is_zero() {
            return None;
        }

        let trade = NewTrade {
            whale_id: whale.id,
            timestamp,
            chain_id: self.chain.id,
            source: TradeSource::ExchangeFlow,
            platform: "perp".into(),
            direction,
            base_asset: Some("USDC".into()),
            quote_asset: Some("USD".into()),
            amount_base: Some(amount),
            amount_quote: None,
            value_usd: Some(amount),
            pnl_usd: None,
            pnl_percent: None,
            open_price_usd: None,
            close_price_usd: None,
            tx_hash: update.hash.clone().filter(|h| !h.is_empty()),
            external_url: Some(explorer_url(&self.chain.slug, &whale.address)),
            catalog_version: None,
        };

        let event = PendingEvent {
            event_type: EventType::ExchangeFlow,
            summary: format!("Perp USDC {direction}"),
            details: json!({"kind": update.delta.kind}),
        };

        Some(BatchItem {
            trade,
            event: Some(event),
        })
    }

    /// Clearinghouse position snapshot → holdings rows.
    async fn fetch_position_holdings(
        &self,
        whale: &Whale,
    ) -> anyhow::Result<Option<Vec<NewHolding>>> {
        let state = match self.client.clearinghouse_state(&whale.address).await {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(
                    address = %whale.address,
                    error = %e,
                    "Clearinghouse state fetch failed, keeping previous holdings"
                );
                return Ok(None);
            }
        };

        let holdings = state
            .positions()
            .into_iter()
            .map(|pos| {
                let value = pos.position_value.or_else(|| {
                    pos.entry_px.map(|px| (pos.szi * px).abs())
                });
                NewHolding {
                    asset_symbol: pos.coin.to_uppercase(),
                    asset_name: Some(pos.coin.to_uppercase()),
                    chain_id: self.chain.id,
                    amount: Some(pos.szi.abs()),
                    value_usd: value,
                    portfolio_percent: None,
                }
            })
            .collect();

        Ok(Some(holdings))
    }

    /// Backfill: same ingestion path, unbounded by recency (checkpoint at
    /// zero when the caller has reset it) and with deeper pagination.
    pub async fn backfill_whale(
        &self,
        whale: &Whale,
        progress: tokio::sync::mpsc::UnboundedSender<(f64, String)>,
    ) -> anyhow::Result<bool> {
        let _ = progress.send((10.0, "fetching perp fills".into()));
        let persisted = self.process_wallet(whale, BACKFILL_MAX_PAGES).await?;
        let _ = progress.send((95.0, format!("persisted {persisted} fills")));

        tracing::info!(
            address = %whale.address,
            trades = persisted,
            "Perp backfill complete"
        );
        Ok(persisted > 0)
    }
}
