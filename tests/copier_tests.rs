mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use std::time::Duration as StdDuration;

use whaletrack::copier::{run_backtest, BacktestParams, CopierManager};
use whaletrack::db::backtest_repo;
use whaletrack::models::TradeDirection;
use whaletrack::oracle::PriceOracle;
use whaletrack::sources::PerpInfoClient;

fn oracle(pool: &sqlx::PgPool) -> PriceOracle {
    PriceOracle::new(
        common::DEAD_PRICE_API,
        pool.clone(),
        StdDuration::from_secs(300),
    )
}

fn params(deposit: i64, pct: f64) -> BacktestParams {
    BacktestParams {
        initial_deposit_usd: deposit.into(),
        position_size_pct: Some(pct),
        fee_bps: 10,
        slippage_bps: 10,
        leverage: None,
        asset_symbols: None,
        start: None,
        end: None,
        max_trades: None,
    }
}

#[tokio::test]
async fn small_round_trip_backtest_matches_cost_model() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "perp").await;
    let whale = common::seed_whale(&pool, "perp", "0xbt01").await;

    let base = Utc::now() - Duration::hours(2);
    let buy = common::make_trade_at(
        &whale, &chain, TradeDirection::Buy, "ETH",
        dec!(10), Some(dec!(1000)), Some("0xbtbuy"), base,
    );
    let sell = common::make_trade_at(
        &whale, &chain, TradeDirection::Sell, "ETH",
        dec!(10), Some(dec!(1100)), Some("0xbtsell"), base + Duration::minutes(10),
    );
    common::insert_trade(&pool, &buy).await;
    common::insert_trade(&pool, &sell).await;

    let oracle = oracle(&pool);
    let output = run_backtest(&pool, &oracle, &whale, &params(1000, 100.0))
        .await
        .unwrap();

    // $1 000 copy of a 10% round trip, 10 bps fee + 10 bps slippage per leg.
    assert!(
        output.summary.net_pnl_usd > 93.0 && output.summary.net_pnl_usd < 99.0,
        "net was {}",
        output.summary.net_pnl_usd
    );
    assert!(
        output.summary.roi_percent > 9.3 && output.summary.roi_percent < 9.9,
        "roi was {}",
        output.summary.roi_percent
    );
    assert_eq!(output.summary.trades_copied, 2);
    assert!(output.summary.total_fees_usd > 0.0);
    assert!(output.summary.total_slippage_usd > 0.0);
    assert_eq!(output.summary.win_rate_percent, Some(100.0));

    // Run persisted for live sessions to reference.
    let run = backtest_repo::get_run(&pool, output.run_id).await.unwrap().unwrap();
    assert_eq!(run.whale_id, whale.id);
    assert_eq!(run.trades_copied, Some(2));
}

#[tokio::test]
async fn equity_curve_is_monotone_and_consistent_with_net_pnl() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "perp").await;
    let whale = common::seed_whale(&pool, "perp", "0xbt02").await;

    let base = Utc::now() - Duration::hours(3);
    let legs = [
        (TradeDirection::Long, dec!(2), dec!(6000), 0i64),
        (TradeDirection::CloseLong, dec!(-2), dec!(6600), 30),
        (TradeDirection::Short, dec!(1), dec!(3300), 60),
        (TradeDirection::CloseShort, dec!(-1), dec!(3000), 90),
    ];
    for (i, (direction, amount, value, offset)) in legs.into_iter().enumerate() {
        let trade = common::make_trade_at(
            &whale, &chain, direction, "ETH",
            amount, Some(value), Some(&format!("0xbt02-{i}")),
            base + Duration::minutes(offset),
        );
        common::insert_trade(&pool, &trade).await;
    }

    let oracle = oracle(&pool);
    let output = run_backtest(&pool, &oracle, &whale, &params(5000, 50.0))
        .await
        .unwrap();

    assert!(!output.equity_curve.is_empty());
    for pair in output.equity_curve.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp);
    }

    let final_equity = output.equity_curve.last().unwrap().equity_usd;
    let expected = output.summary.initial_deposit_usd + output.summary.net_pnl_usd;
    assert!(
        (final_equity - expected).abs() < 0.01,
        "curve ends at {final_equity}, expected {expected}"
    );
}

#[tokio::test]
async fn backtest_without_trades_is_a_not_found_case() {
    let pool = common::setup_test_db().await;
    let whale = common::seed_whale(&pool, "perp", "0xbt03").await;

    let oracle = oracle(&pool);
    let err = run_backtest(&pool, &oracle, &whale, &params(1000, 100.0))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no trades"));
}

#[tokio::test]
async fn asset_filter_limits_the_replay() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "perp").await;
    let whale = common::seed_whale(&pool, "perp", "0xbt04").await;

    let base = Utc::now() - Duration::hours(1);
    let eth_buy = common::make_trade_at(
        &whale, &chain, TradeDirection::Buy, "ETH",
        dec!(1), Some(dec!(3000)), Some("0xbt04-eth"), base,
    );
    let btc_buy = common::make_trade_at(
        &whale, &chain, TradeDirection::Buy, "BTC",
        dec!(1), Some(dec!(60000)), Some("0xbt04-btc"), base + Duration::minutes(1),
    );
    common::insert_trade(&pool, &eth_buy).await;
    common::insert_trade(&pool, &btc_buy).await;

    let oracle = oracle(&pool);
    let mut p = params(1000, 10.0);
    p.asset_symbols = Some(vec!["BTC".into()]);

    let output = run_backtest(&pool, &oracle, &whale, &p).await.unwrap();
    assert_eq!(output.summary.trades_copied, 1);
    assert_eq!(output.trades[0].base_asset.as_deref(), Some("BTC"));
}

#[tokio::test]
async fn live_session_lifecycle_persists_across_manager_restarts() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "perp").await;
    let whale = common::seed_whale(&pool, "perp", "0xlive01").await;

    let base = Utc::now() - Duration::hours(1);
    let buy = common::make_trade_at(
        &whale, &chain, TradeDirection::Buy, "ETH",
        dec!(10), Some(dec!(1000)), Some("0xlive01-buy"), base,
    );
    let sell = common::make_trade_at(
        &whale, &chain, TradeDirection::Sell, "ETH",
        dec!(10), Some(dec!(1100)), Some("0xlive01-sell"), base + Duration::minutes(5),
    );
    common::insert_trade(&pool, &buy).await;
    common::insert_trade(&pool, &sell).await;

    let oracle = oracle(&pool);
    let output = run_backtest(&pool, &oracle, &whale, &params(1000, 100.0))
        .await
        .unwrap();
    let run = backtest_repo::get_run(&pool, output.run_id).await.unwrap().unwrap();

    // Fill polling points at a dead upstream: session creation must still
    // succeed, with an empty cursor.
    let manager = CopierManager::new(pool.clone(), PerpInfoClient::new(common::DEAD_PRICE_API));
    let session = manager
        .start_session(&whale, &run, Some(25.0))
        .await
        .unwrap();
    assert!(session.active);
    assert_eq!(session.position_size_pct, Some(25.0));

    let active = manager.list_active(Some(whale.id)).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, session.id);

    // A fresh manager (process restart) resumes the session from the DB.
    let restarted = CopierManager::new(pool.clone(), PerpInfoClient::new(common::DEAD_PRICE_API));
    let restored = restarted.restore().await.unwrap();
    assert_eq!(restored, 1);

    let stopped = restarted.stop_session(session.id).await.unwrap();
    assert!(stopped);

    let status = restarted.session_status(session.id).await.unwrap().unwrap();
    assert!(!status.active);
}
