use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use whaletrack::analytics::{ClassifierThresholds, MetricsEngine};
use whaletrack::api::router::create_router;
use whaletrack::backfill::BackfillOrchestrator;
use whaletrack::broadcast::Broadcaster;
use whaletrack::config::AppConfig;
use whaletrack::copier::CopierManager;
use whaletrack::ingestion::{CollectorDeps, EvmCollector, PerpCollector, UtxoCollector};
use whaletrack::oracle::PriceOracle;
use whaletrack::scheduler::Scheduler;
use whaletrack::sources::{EvmRpcClient, PerpInfoClient, UtxoApiClient};
use whaletrack::{db, metrics, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls CryptoProvider");

    dotenvy::dotenv().ok();
    init_tracing();

    let command = std::env::args().nth(1).unwrap_or_else(|| "serve".into());
    match command.as_str() {
        "serve" => serve().await,
        "migrate" => migrate().await,
        other => {
            eprintln!("unknown command '{other}' (expected 'serve' or 'migrate')");
            std::process::exit(2);
        }
    }
}

/// Apply pending schema migrations and exit.
async fn migrate() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let pool = db::init_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied");
    Ok(())
}

/// Start the API, collectors, scheduler, and copier manager.
async fn serve() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    let metrics_handle = metrics::init_metrics();
    tracing::info!("Prometheus metrics initialized");

    tracing::info!("Connecting to database...");
    let pool = db::init_pool(&config.database_url).await?;
    tracing::info!("Database connected");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // --- Shutdown signal fan-out ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // --- Core services ---
    let oracle = Arc::new(PriceOracle::new(
        &config.price_api_base_url,
        pool.clone(),
        Duration::from_secs(config.price_cache_ttl_secs),
    ));
    let engine = Arc::new(MetricsEngine::new(pool.clone(), Arc::clone(&oracle)));
    let broadcaster = Arc::new(Broadcaster::new());

    let deps = CollectorDeps {
        pool: pool.clone(),
        oracle: Arc::clone(&oracle),
        engine: Arc::clone(&engine),
        broadcaster: Arc::clone(&broadcaster),
        thresholds: config.event_thresholds.clone(),
    };

    let perp_client = PerpInfoClient::new(&config.perp_info_url);
    let utxo_client = UtxoApiClient::new(&config.utxo_api_base_url);

    let evm_chain = whaletrack::db::whale_repo::get_chain_by_slug(&pool, "evm")
        .await?
        .ok_or_else(|| anyhow::anyhow!("chains table is not seeded (run migrate)"))?;
    let utxo_chain = whaletrack::db::whale_repo::get_chain_by_slug(&pool, "utxo")
        .await?
        .ok_or_else(|| anyhow::anyhow!("chains table is not seeded (run migrate)"))?;
    let perp_chain = whaletrack::db::whale_repo::get_chain_by_slug(&pool, "perp")
        .await?
        .ok_or_else(|| anyhow::anyhow!("chains table is not seeded (run migrate)"))?;

    // Orchestrator gets its own collector instances; the tick loops consume
    // theirs below.
    let orchestrator_evm = config.evm_rpc_http_url.as_deref().map(|url| {
        Arc::new(EvmCollector::new(
            deps.clone(),
            EvmRpcClient::new(url),
            evm_chain.clone(),
        ))
    });
    let backfill = Arc::new(BackfillOrchestrator::new(
        deps.clone(),
        orchestrator_evm,
        Arc::new(UtxoCollector::new(
            deps.clone(),
            utxo_client.clone(),
            utxo_chain.clone(),
        )),
        Arc::new(PerpCollector::new(
            deps.clone(),
            perp_client.clone(),
            perp_chain.clone(),
        )),
        shutdown_rx.clone(),
    ));

    // --- Collector tick loops ---
    if config.enable_ingestors {
        if let Some(url) = config.evm_rpc_http_url.as_deref() {
            let collector =
                EvmCollector::new(deps.clone(), EvmRpcClient::new(url), evm_chain.clone());
            let interval = config.evm_poll_interval_secs;
            let rx = shutdown_rx.clone();
            tokio::spawn(async move {
                collector.run(interval, rx).await;
            });
        } else {
            tracing::warn!("EVM_RPC_HTTP_URL not set — EVM collector disabled");
        }

        let utxo_collector =
            UtxoCollector::new(deps.clone(), utxo_client.clone(), utxo_chain.clone());
        let utxo_interval = config.utxo_poll_interval_secs;
        let utxo_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            utxo_collector.run(utxo_interval, utxo_rx).await;
        });

        let perp_collector =
            PerpCollector::new(deps.clone(), perp_client.clone(), perp_chain.clone());
        let perp_interval = config.perp_poll_interval_secs;
        let perp_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            perp_collector.run(perp_interval, perp_rx).await;
        });

        tracing::info!("Collectors spawned");
    } else {
        tracing::info!("Ingestors disabled (ENABLE_INGESTORS=false)");
    }

    // --- Scheduler ---
    if config.enable_scheduler {
        let scheduler = Arc::new(Scheduler::new(
            pool.clone(),
            Arc::clone(&oracle),
            Arc::clone(&engine),
            ClassifierThresholds {
                freq_hi: config.classifier_freq_hi,
                volume_ratio_hi: config.classifier_volume_ratio_hi,
            },
        ));
        scheduler.spawn_all(shutdown_rx.clone());
    } else {
        tracing::info!("Scheduler disabled (ENABLE_SCHEDULER=false)");
    }

    // --- Copier manager (shadow-only live sessions) ---
    let copier = Arc::new(CopierManager::new(pool.clone(), perp_client.clone()));
    if let Err(e) = copier.restore().await {
        tracing::warn!(error = %e, "Failed to restore copier sessions");
    }
    {
        let copier = Arc::clone(&copier);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            copier.run(rx).await;
        });
    }

    let state = AppState {
        db: pool,
        config,
        oracle,
        engine,
        broadcaster,
        backfill,
        copier,
        perp_client,
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tell the worker tasks to wind down.
    let _ = shutdown_tx.send(true);

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl+c");
    tracing::info!("Received SIGINT (Ctrl+C), starting graceful shutdown...");
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();
}
