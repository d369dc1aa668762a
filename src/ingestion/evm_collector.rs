use metrics::{counter, histogram};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;

use crate::db::checkpoint_repo;
use crate::errors::SourceError;
use crate::models::whale::explorer_url;
use crate::models::{
    Chain, EventType, IngestionCheckpoint, NewTrade, TradeDirection, TradeSource, Whale,
};
use crate::sources::catalog::{self, CounterpartyKind, CATALOG_VERSION};
use crate::sources::evm::{self, EvmRpcClient, RpcLog};

use super::{commit_wallet_batch, shutting_down, Backoff, BatchItem, CollectorDeps, PendingEvent, WalletBatch};

const SOURCE: &str = "evm";

/// First tick on a wallet with no checkpoint looks back this many blocks.
const INITIAL_LOOKBACK_BLOCKS: u64 = 2_000;

/// eth_getLogs span per request during backfill.
const BACKFILL_CHUNK_BLOCKS: u64 = 10_000;

/// How far a backfill reaches behind the head.
const BACKFILL_SPAN_BLOCKS: u64 = 500_000;

#[derive(Debug, Clone)]
struct TokenMeta {
    symbol: String,
    decimals: u32,
}

/// EVM source collector. Tracks a last-processed block height per wallet and
/// reads only log-filtered transfers — never full blocks.
pub struct EvmCollector {
    deps: CollectorDeps,
    client: EvmRpcClient,
    chain: Chain,
    token_meta: Mutex<HashMap<String, Option<TokenMeta>>>,
}

impl EvmCollector {
    pub fn new(deps: CollectorDeps, client: EvmRpcClient, chain: Chain) -> Self {
        Self {
            deps,
            client,
            chain,
            token_meta: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs, "EVM collector started");
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
                    tracing::warn!(error = %e, "EVM tick failed, backing off");
                }
            }
        }
        tracing::info!("EVM collector stopped");
    }

    /// One pass over every tracked EVM wallet.
    pub async fn tick(&self, shutdown: &watch::Receiver<bool>) -> anyhow::Result<usize> {
        let latest = self
            .client
            .latest_block()
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let whales =
            crate::db::whale_repo::list_whales_for_chain(&self.deps.pool, self.chain.id).await?;
        let mut persisted = 0usize;

        for whale in &whales {
            if shutting_down(shutdown) {
                break;
            }

            let checkpoint =
                checkpoint_repo::get_checkpoint(&self.deps.pool, whale.id, SOURCE).await?;
            let from_block = checkpoint
                .as_ref()
                .and_then(|cp| cp.last_block_height)
                .map(|h| h as u64 + 1)
                .unwrap_or_else(|| latest.saturating_sub(INITIAL_LOOKBACK_BLOCKS));

            if from_block > latest {
                continue;
            }

            match self.process_wallet(whale, from_block, latest).await {
                Ok(stats) => persisted += stats,
                Err(e) => match e.downcast_ref::<SourceError>() {
                    Some(source_err) if source_err.ends_tick() => return Err(e),
                    _ => {
                        tracing::warn!(
                            address = %whale.address,
                            error = %e,
                            "EVM wallet pass failed, continuing"
                        );
                    }
                },
            }
        }

        Ok(persisted)
    }

    /// Normalize and commit everything for one wallet in `[from, to]`.
    async fn process_wallet(&self, whale: &Whale, from: u64, to: u64) -> anyhow::Result<usize> {
        let logs = self
            .client
            .transfer_logs(&whale.address, from, to)
            .await
            .map_err(anyhow::Error::from)?;

        let batch = self.normalize_logs(whale, logs, to).await?;
        if batch.items.is_empty() {
            // Still advance the block cursor so quiet wallets don't rescan.
            let mut tx = self.deps.pool.begin().await?;
            checkpoint_repo::advance_checkpoint(&mut *tx, &batch.checkpoint).await?;
            tx.commit().await?;
            return Ok(0);
        }

        let stats = commit_wallet_batch(&self.deps, whale, &self.chain, batch).await?;
        Ok(stats.trades)
    }

    async fn normalize_logs(
        &self,
        whale: &Whale,
        logs: Vec<RpcLog>,
        checkpoint_block: u64,
    ) -> anyhow::Result<WalletBatch> {
        let wallet_topic = evm::pad_address_topic(&whale.address);
        let mut block_times: HashMap<u64, Option<i64>> = HashMap::new();
        let mut items = Vec::new();

        for log in logs {
            match self
                .normalize_log(whale, &wallet_topic, &log, &mut block_times)
                .await
            {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                // Transport failures mid-batch must not advance the block
                // cursor past unprocessed records.
                Err(e) if e.ends_tick() => return Err(e.into()),
                Err(e) => {
                    counter!("decode_errors_total", "source" => SOURCE).increment(1);
                    tracing::debug!(
                        tx = %log.transaction_hash,
                        error = %e,
                        "Skipping undecodable EVM log"
                    );
                }
            }
        }

        let checkpoint = IngestionCheckpoint {
            whale_id: whale.id,
            source: SOURCE.into(),
            last_block_height: Some(checkpoint_block as i64),
            last_tx_id: None,
            last_fill_time: None,
            last_position_time: None,
            updated_at: None,
        };

        Ok(WalletBatch {
            items,
            checkpoint,
            holdings: None,
        })
    }

    async fn normalize_log(
        &self,
        whale: &Whale,
        wallet_topic: &str,
        log: &RpcLog,
        block_times: &mut HashMap<u64, Option<i64>>,
    ) -> Result<Option<BatchItem>, SourceError> {
        if log.topics.len() < 3 || !log.topics[0].eq_ignore_ascii_case(evm::TRANSFER_TOPIC) {
            return Ok(None);
        }

        let outgoing = log.topics[1].eq_ignore_ascii_case(wallet_topic);
        let incoming = log.topics[2].eq_ignore_ascii_case(wallet_topic);
        if !outgoing && !incoming {
            return Ok(None);
        }

        let counterparty = if outgoing {
            evm::topic_to_address(&log.topics[2])
        } else {
            evm::topic_to_address(&log.topics[1])
        };

        let Some(meta) = self.token_meta(&log.address).await? else {
            return Err(SourceError::Decode(format!(
                "token {} has no readable metadata",
                log.address
            )));
        };

        let amount = evm::parse_hex_amount(&log.data, meta.decimals)
            .ok_or_else(|| SourceError::Decode("transfer amount".into()))?;
        if amount.is_zero() {
            return Ok(None);
        }

        let block_number = log
            .block_number_u64()
            .ok_or_else(|| SourceError::Decode("block number".into()))?;
        let block_time = match block_times.get(&block_number) {
            Some(cached) => *cached,
            None => {
                let fetched = self.client.block_timestamp(block_number).await?;
                block_times.insert(block_number, fetched);
                fetched
            }
        };
        let timestamp = block_time
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| SourceError::Decode("block timestamp".into()))?;

        // Counterparty classification decides source, direction, and event
        // type. Router traffic is a swap leg; exchange traffic is a flow.
        let entry = catalog::classify(&counterparty);
        let (source, direction, event_type, platform) = match entry.map(|e| e.kind) {
            Some(CounterpartyKind::Exchange) => (
                TradeSource::ExchangeFlow,
                if outgoing {
                    TradeDirection::Withdraw
                } else {
                    TradeDirection::Deposit
                },
                EventType::ExchangeFlow,
                entry.map(|e| e.label).unwrap_or("exchange"),
            ),
            Some(CounterpartyKind::DexRouter) => (
                TradeSource::Onchain,
                if outgoing {
                    TradeDirection::Sell
                } else {
                    TradeDirection::Buy
                },
                EventType::LargeSwap,
                entry.map(|e| e.label).unwrap_or("dex"),
            ),
            Some(CounterpartyKind::Bridge) | None => (
                TradeSource::Onchain,
                if outgoing {
                    TradeDirection::Withdraw
                } else {
                    TradeDirection::Deposit
                },
                EventType::LargeTransfer,
                entry.map(|e| e.label).unwrap_or("evm"),
            ),
        };

        let price = self
            .deps
            .oracle
            .spot(&meta.symbol)
            .await
            .unwrap_or_else(|e| {
                tracing::debug!(symbol = %meta.symbol, error = %e, "Spot lookup failed");
                None
            });
        let value_usd = price.map(|p| p * amount);

        let trade = NewTrade {
            whale_id: whale.id,
            timestamp,
            chain_id: self.chain.id,
            source,
            platform: platform.to_string(),
            direction,
            base_asset: Some(meta.symbol.clone()),
            quote_asset: Some("USD".into()),
            amount_base: Some(amount),
            amount_quote: None,
            value_usd,
            pnl_usd: None,
            pnl_percent: None,
            open_price_usd: direction.is_entry().then_some(price).flatten(),
            close_price_usd: direction.is_exit().then_some(price).flatten(),
            tx_hash: Some(log.tx_key()),
            external_url: Some(explorer_url(&self.chain.slug, &whale.address)),
            catalog_version: entry.is_some().then_some(CATALOG_VERSION),
        };

        let event = PendingEvent {
            event_type,
            summary: format!("{} {} {}", meta.symbol, direction, amount.normalize()),
            details: json!({
                "token": log.address,
                "counterparty": counterparty,
                "counterparty_label": entry.map(|e| e.label),
                "block": block_number,
            }),
        };

        Ok(Some(BatchItem {
            trade,
            event: Some(event),
        }))
    }

    async fn token_meta(&self, token: &str) -> Result<Option<TokenMeta>, SourceError> {
        let key = token.to_lowercase();
        {
            let cache = self.token_meta.lock().await;
            if let Some(meta) = cache.get(&key) {
                return Ok(meta.clone());
            }
        }

        let symbol = self.client.erc20_symbol(token).await?;
        let decimals = self.client.erc20_decimals(token).await?;
        let meta = match (symbol, decimals) {
            (Some(symbol), Some(decimals)) => Some(TokenMeta { symbol, decimals }),
            (Some(symbol), None) => Some(TokenMeta {
                symbol,
                decimals: 18,
            }),
            _ => None,
        };

        self.token_meta.lock().await.insert(key, meta.clone());
        Ok(meta)
    }

    /// Backfill history for one wallet, chunked by block range. Progress is
    /// reported per chunk over the channel.
    pub async fn backfill_whale(
        &self,
        whale: &Whale,
        progress: tokio::sync::mpsc::UnboundedSender<(f64, String)>,
    ) -> anyhow::Result<bool> {
        let latest = self
            .client
            .latest_block()
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let start = latest.saturating_sub(BACKFILL_SPAN_BLOCKS);
        let total_chunks = (latest - start) / BACKFILL_CHUNK_BLOCKS + 1;

        let mut persisted = 0usize;
        let mut from = start;
        let mut chunk_idx = 0u64;

        while from <= latest {
            let to = (from + BACKFILL_CHUNK_BLOCKS - 1).min(latest);
            persisted += self.process_wallet(whale, from, to).await?;

            chunk_idx += 1;
            let pct = (chunk_idx as f64 / total_chunks as f64 * 100.0).min(99.0);
            let _ = progress.send((pct, format!("scanned blocks {from}..{to}")));

            from = to + 1;
        }

        tracing::info!(
            address = %whale.address,
            trades = persisted,
            "EVM backfill complete"
        );
        Ok(persisted > 0)
    }
}
