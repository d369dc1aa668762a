use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;

use super::handlers;

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/dashboard/summary", get(handlers::dashboard::summary))
        .route(
            "/whales",
            get(handlers::whales::list).post(handlers::whales::create),
        )
        .route("/whales/top", get(handlers::whales::top))
        .route(
            "/whales/:id",
            patch(handlers::whales::patch).delete(handlers::whales::delete),
        )
        .route(
            "/whales/:id/backfill_status",
            get(handlers::whales::backfill_status),
        )
        .route("/whales/:id/backfill", post(handlers::whales::start_backfill))
        .route(
            "/whales/:id/reset_hyperliquid",
            post(handlers::whales::reset),
        )
        .route("/wallets/:chain/:address", get(handlers::wallets::detail))
        .route(
            "/wallets/:chain/:address/roi-history",
            get(handlers::wallets::roi_history),
        )
        .route(
            "/wallets/:chain/:address/portfolio-history",
            get(handlers::wallets::portfolio_history),
        )
        .route(
            "/wallets/:chain/:address/trades",
            get(handlers::wallets::trades),
        )
        .route(
            "/wallets/:chain/:address/positions",
            get(handlers::wallets::positions),
        )
        .route("/events/recent", get(handlers::events::recent))
        .route("/events/live", get(handlers::events::live))
        .route("/events/ws/live", get(handlers::events::ws_live))
        .route("/backtest/copier", post(handlers::backtest::copier))
        .route("/backtest/live/start", post(handlers::backtest::live_start))
        .route("/backtest/live/stop", post(handlers::backtest::live_stop))
        .route("/backtest/live/status", get(handlers::backtest::live_status))
        .route("/backtest/live/active", get(handlers::backtest::live_active))
        .route("/backtest/live-trades", get(handlers::backtest::live_trades));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .nest("/api/v1", api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
