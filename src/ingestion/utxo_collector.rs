use metrics::{counter, histogram};
use rust_decimal::Decimal;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::db::{checkpoint_repo, whale_repo};
use crate::errors::SourceError;
use crate::models::whale::explorer_url;
use crate::models::{
    Chain, EventType, IngestionCheckpoint, NewTrade, TradeDirection, TradeSource, Whale,
};
use crate::sources::catalog::{self, CATALOG_VERSION};
use crate::sources::utxo::{UtxoApiClient, UtxoTx};

use super::{commit_wallet_batch, shutting_down, Backoff, BatchItem, CollectorDeps, PendingEvent, WalletBatch};

const SOURCE: &str = "utxo";
const SATS_PER_COIN: u64 = 100_000_000;

/// Pages fetched per wallet per tick; backfills page much deeper.
const TICK_MAX_PAGES: usize = 4;
const BACKFILL_MAX_PAGES: usize = 200;

/// UTXO source collector. Paginates each wallet's address history past the
/// checkpointed tx id and classifies by input/output membership.
pub struct UtxoCollector {
    deps: CollectorDeps,
    client: UtxoApiClient,
    chain: Chain,
}

impl UtxoCollector {
    pub fn new(deps: CollectorDeps, client: UtxoApiClient, chain: Chain) -> Self {
        Self { deps, client, chain }
    }

    pub async fn run(self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs, "UTXO collector started");
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
                    tracing::warn!(error = %e, "UTXO tick failed, backing off");
                }
            }
        }
        tracing::info!("UTXO collector stopped");
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
                            "UTXO wallet pass failed, continuing"
                        );
                    }
                },
            }
        }

        Ok(persisted)
    }

    async fn process_wallet(&self, whale: &Whale, max_pages: usize) -> anyhow::Result<usize> {
        let checkpoint =
            checkpoint_repo::get_checkpoint(&self.deps.pool, whale.id, SOURCE).await?;
        let stop_txid = checkpoint.as_ref().and_then(|cp| cp.last_tx_id.clone());

        let txs = self
            .client
            .address_txs_until(&whale.address, stop_txid.as_deref(), max_pages)
            .await
            .map_err(anyhow::Error::from)?;
        if txs.is_empty() {
            return Ok(0);
        }

        let price = self.deps.oracle.spot("BTC").await.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "BTC spot lookup failed");
            None
        });

        let newest_txid = txs.last().map(|t| t.txid.clone());
        let mut items = Vec::new();
        for tx in &txs {
            match normalize_tx(whale, &self.chain, tx, price) {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => {
                    counter!("decode_errors_total", "source" => SOURCE).increment(1);
                    tracing::debug!(txid = %tx.txid, error = %e, "Skipping undecodable UTXO tx");
                }
            }
        }

        let batch = WalletBatch {
            items,
            checkpoint: IngestionCheckpoint {
                whale_id: whale.id,
                source: SOURCE.into(),
                last_block_height: None,
                last_tx_id: newest_txid,
                last_fill_time: None,
                last_position_time: None,
                updated_at: None,
            },
            holdings: None,
        };

        if batch.is_empty() {
            return Ok(0);
        }
        let stats = commit_wallet_batch(&self.deps, whale, &self.chain, batch).await?;
        Ok(stats.trades)
    }

    /// Backfill the wallet's full reachable history.
    pub async fn backfill_whale(
        &self,
        whale: &Whale,
        progress: tokio::sync::mpsc::UnboundedSender<(f64, String)>,
    ) -> anyhow::Result<bool> {
        let _ = progress.send((10.0, "fetching address history".into()));
        let persisted = self.process_wallet(whale, BACKFILL_MAX_PAGES).await?;
        let _ = progress.send((95.0, format!("persisted {persisted} transactions")));

        tracing::info!(
            address = %whale.address,
            trades = persisted,
            "UTXO backfill complete"
        );
        Ok(persisted > 0)
    }
}

/// Map one confirmed transaction to a trade. Self-transfers (wallet on both
/// sides) are skipped; counterparties in the exchange catalog turn the trade
/// into an exchange flow.
fn normalize_tx(
    whale: &Whale,
    chain: &Chain,
    tx: &UtxoTx,
    price: Option<Decimal>,
) -> Result<Option<BatchItem>, SourceError> {
    if !tx.status.confirmed {
        return Ok(None);
    }

    let in_inputs = tx.input_addresses().any(|a| a == whale.address);
    let in_outputs = tx.output_addresses().any(|a| a == whale.address);

    let direction = match (in_inputs, in_outputs) {
        (false, true) => TradeDirection::Deposit,
        (true, false) => TradeDirection::Withdraw,
        _ => return Ok(None),
    };

    let sats = match direction {
        TradeDirection::Deposit => tx.value_to(&whale.address),
        _ => tx.value_from(&whale.address),
    };
    if sats == 0 {
        return Ok(None);
    }
    let amount = Decimal::from(sats) / Decimal::from(SATS_PER_COIN);

    let timestamp = tx
        .status
        .block_time
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| SourceError::Decode("missing block time".into()))?;

    let exchange_entry = tx
        .input_addresses()
        .chain(tx.output_addresses())
        .filter(|a| *a != whale.address)
        .find_map(catalog::classify)
        .filter(|e| e.kind == catalog::CounterpartyKind::Exchange);

    let (source, event_type, platform) = match exchange_entry {
        Some(entry) => (TradeSource::ExchangeFlow, EventType::ExchangeFlow, entry.label),
        None => (TradeSource::Onchain, EventType::LargeTransfer, "utxo"),
    };

    let value_usd = price.map(|p| p * amount);

    let trade = NewTrade {
        whale_id: whale.id,
        timestamp,
        chain_id: chain.id,
        source,
        platform: platform.to_string(),
        direction,
        base_asset: Some("BTC".into()),
        quote_asset: Some("USD".into()),
        amount_base: Some(amount),
        amount_quote: None,
        value_usd,
        pnl_usd: None,
        pnl_percent: None,
        open_price_usd: matches!(direction, TradeDirection::Deposit)
            .then_some(price)
            .flatten(),
        close_price_usd: matches!(direction, TradeDirection::Withdraw)
            .then_some(price)
            .flatten(),
        tx_hash: Some(tx.txid.clone()),
        external_url: Some(explorer_url(&chain.slug, &whale.address)),
        catalog_version: exchange_entry.is_some().then_some(CATALOG_VERSION),
    };

    let event = PendingEvent {
        event_type,
        summary: format!("BTC {} {}", direction, amount.normalize()),
        details: json!({
            "txid": tx.txid,
            "block_height": tx.status.block_height,
            "counterparty_label": exchange_entry.map(|e| e.label),
        }),
    };

    Ok(Some(BatchItem {
        trade,
        event: Some(event),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chain;
    use crate::sources::utxo::{Prevout, TxInput, TxOutput, TxStatus};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn whale(address: &str) -> Whale {
        Whale {
            id: Uuid::new_v4(),
            address: address.into(),
            chain_id: 2,
            whale_type: None,
            labels: serde_json::json!([]),
            first_seen_at: None,
            last_active_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn chain() -> Chain {
        Chain {
            id: 2,
            slug: "utxo".into(),
            name: "UTXO".into(),
        }
    }

    fn tx_to(addr: &str, from: &str, sats: u64) -> UtxoTx {
        UtxoTx {
            txid: "txid-1".into(),
            status: TxStatus {
                confirmed: true,
                block_height: Some(850_000),
                block_time: Some(1_715_000_000),
            },
            vin: vec![TxInput {
                prevout: Some(Prevout {
                    scriptpubkey_address: Some(from.into()),
                    value: Some(sats),
                }),
            }],
            vout: vec![TxOutput {
                scriptpubkey_address: Some(addr.into()),
                value: Some(sats),
            }],
        }
    }

    #[test]
    fn incoming_tx_is_a_deposit() {
        let w = whale("bc1qwallet");
        let tx = tx_to("bc1qwallet", "bc1qother", 150_000_000);

        let item = normalize_tx(&w, &chain(), &tx, Some(dec!(60000)))
            .unwrap()
            .unwrap();
        assert_eq!(item.trade.direction, TradeDirection::Deposit);
        assert_eq!(item.trade.amount_base, Some(dec!(1.5)));
        assert_eq!(item.trade.value_usd, Some(dec!(90000)));
        assert_eq!(item.trade.source, TradeSource::Onchain);
    }

    #[test]
    fn exchange_counterparty_marks_flow() {
        let w = whale("bc1qwallet");
        // Coinbase hot wallet from the catalog
        let tx = tx_to(
            "bc1qwallet",
            "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh",
            100_000_000,
        );

        let item = normalize_tx(&w, &chain(), &tx, Some(dec!(60000)))
            .unwrap()
            .unwrap();
        assert_eq!(item.trade.source, TradeSource::ExchangeFlow);
        assert_eq!(item.trade.catalog_version, Some(CATALOG_VERSION));
        assert_eq!(
            item.event.as_ref().unwrap().event_type,
            EventType::ExchangeFlow
        );
    }

    #[test]
    fn self_transfer_is_skipped() {
        let w = whale("bc1qwallet");
        let mut tx = tx_to("bc1qwallet", "bc1qother", 100_000_000);
        tx.vin.push(TxInput {
            prevout: Some(Prevout {
                scriptpubkey_address: Some("bc1qwallet".into()),
                value: Some(50_000_000),
            }),
        });

        assert!(normalize_tx(&w, &chain(), &tx, None).unwrap().is_none());
    }

    #[test]
    fn unknown_price_persists_without_usd_value() {
        let w = whale("bc1qwallet");
        let tx = tx_to("bc1qwallet", "bc1qother", 200_000_000);

        let item = normalize_tx(&w, &chain(), &tx, None).unwrap().unwrap();
        assert_eq!(item.trade.value_usd, None);
        assert_eq!(item.trade.amount_base, Some(dec!(2)));
    }

    #[test]
    fn unconfirmed_tx_is_skipped() {
        let w = whale("bc1qwallet");
        let mut tx = tx_to("bc1qwallet", "bc1qother", 100_000_000);
        tx.status.confirmed = false;

        assert!(normalize_tx(&w, &chain(), &tx, None).unwrap().is_none());
    }
}
