use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::analytics::{classifier, ClassifierThresholds, MetricsEngine};
use crate::db::{trade_repo, whale_repo};
use crate::oracle::PriceOracle;

const CLASSIFIER_INTERVAL_SECS: u64 = 86_400;
const METRICS_INTERVAL_SECS: u64 = 86_400;
const PRICE_REFRESH_INTERVAL_SECS: u64 = 300;

/// Periodic jobs: daily whale classification, daily full metrics rebuild,
/// and a 5-minute spot price refresh for tracked assets.
///
/// Each job loop awaits its run to completion before sleeping, so runs never
/// overlap within a process. A failing run logs and waits for the next
/// interval — never crashes the process.
pub struct Scheduler {
    pool: sqlx::PgPool,
    oracle: Arc<PriceOracle>,
    engine: Arc<MetricsEngine>,
    thresholds: ClassifierThresholds,
}

impl Scheduler {
    pub fn new(
        pool: sqlx::PgPool,
        oracle: Arc<PriceOracle>,
        engine: Arc<MetricsEngine>,
        thresholds: ClassifierThresholds,
    ) -> Self {
        Self {
            pool,
            oracle,
            engine,
            thresholds,
        }
    }

    /// Spawn all three job loops.
    pub fn spawn_all(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let classifier_self = Arc::clone(&self);
        let classifier_shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_job_loop(
                "classifier",
                CLASSIFIER_INTERVAL_SECS,
                classifier_shutdown,
                move || {
                    let this = Arc::clone(&classifier_self);
                    async move { this.classify_whales().await }
                },
            )
            .await;
        });

        let metrics_self = Arc::clone(&self);
        let metrics_shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_job_loop(
                "metrics_aggregator",
                METRICS_INTERVAL_SECS,
                metrics_shutdown,
                move || {
                    let this = Arc::clone(&metrics_self);
                    async move { this.rebuild_all_metrics().await }
                },
            )
            .await;
        });

        let price_self = Arc::clone(&self);
        tokio::spawn(async move {
            run_job_loop(
                "price_refresher",
                PRICE_REFRESH_INTERVAL_SECS,
                shutdown,
                move || {
                    let this = Arc::clone(&price_self);
                    async move { this.refresh_prices().await }
                },
            )
            .await;
        });

        tracing::info!("Scheduler jobs spawned");
    }

    async fn classify_whales(&self) -> anyhow::Result<()> {
        let changed = classifier::run_classifier(&self.pool, &self.thresholds).await?;
        tracing::info!(reclassified = changed, "Classifier pass complete");
        Ok(())
    }

    async fn rebuild_all_metrics(&self) -> anyhow::Result<()> {
        let whales = whale_repo::list_all_whales(&self.pool).await?;
        metrics::gauge!("tracked_whales").set(whales.len() as f64);
        let mut rebuilt = 0usize;
        for whale in &whales {
            match self.engine.full_rebuild(whale.id).await {
                Ok(true) => rebuilt += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(address = %whale.address, error = %e, "Scheduled rebuild failed");
                }
            }
        }
        tracing::info!(whales = whales.len(), rebuilt, "Metrics aggregation complete");
        Ok(())
    }

    async fn refresh_prices(&self) -> anyhow::Result<()> {
        // Tracked assets are everything any whale has traded.
        let whales = whale_repo::list_all_whales(&self.pool).await?;
        let mut assets: Vec<String> = Vec::new();
        for whale in &whales {
            for asset in trade_repo::distinct_assets(&self.pool, whale.id).await? {
                if !assets.contains(&asset) {
                    assets.push(asset);
                }
            }
        }
        if assets.is_empty() {
            return Ok(());
        }

        let refreshed = self.oracle.refresh_spot(&assets).await?;
        tracing::debug!(assets = assets.len(), refreshed, "Spot prices refreshed");
        Ok(())
    }
}

/// Generic job loop. The first run fires immediately; runs are single-flight
/// because the loop awaits each run to completion before sleeping.
async fn run_job_loop<F, Fut>(
    name: &'static str,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
    job: F,
) where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    tracing::info!(job = name, interval_secs, "Scheduler job loop started");

    loop {
        if let Err(e) = job().await {
            tracing::error!(job = name, error = %e, "Scheduled job failed");
        }

        tokio::select! {
            _ = sleep(Duration::from_secs(interval_secs)) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }
    tracing::info!(job = name, "Scheduler job loop stopped");
}
