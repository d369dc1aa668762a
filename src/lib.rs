pub mod analytics;
pub mod api;
pub mod backfill;
pub mod broadcast;
pub mod config;
pub mod copier;
pub mod db;
pub mod errors;
pub mod ingestion;
pub mod metrics;
pub mod models;
pub mod oracle;
pub mod scheduler;
pub mod sources;

use std::sync::Arc;

use crate::analytics::MetricsEngine;
use crate::backfill::BackfillOrchestrator;
use crate::broadcast::Broadcaster;
use crate::config::AppConfig;
use crate::copier::CopierManager;
use crate::oracle::PriceOracle;
use crate::sources::PerpInfoClient;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: AppConfig,
    pub oracle: Arc<PriceOracle>,
    pub engine: Arc<MetricsEngine>,
    pub broadcaster: Arc<Broadcaster>,
    pub backfill: Arc<BackfillOrchestrator>,
    pub copier: Arc<CopierManager>,
    pub perp_client: PerpInfoClient,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
