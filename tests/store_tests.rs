mod common;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use serde_json::json;

use whaletrack::db::cursor::TradeCursor;
use whaletrack::db::trade_repo::{self, TradeFilters};
use whaletrack::db::checkpoint_repo;
use whaletrack::ingestion::{commit_wallet_batch, BatchItem, PendingEvent, WalletBatch};
use whaletrack::models::{EventType, IngestionCheckpoint, TradeDirection};

#[tokio::test]
async fn duplicate_tx_hash_upserts_instead_of_inserting() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "evm").await;
    let whale = common::seed_whale(&pool, "evm", "0xdedupe01").await;

    let trade = common::make_trade(
        &whale,
        &chain,
        TradeDirection::Buy,
        "ETH",
        dec!(10),
        Some(dec!(1000000)),
        Some("0xabc"),
        1,
    );

    common::insert_trade(&pool, &trade).await;
    common::insert_trade(&pool, &trade).await;

    assert_eq!(common::count_trades_for(&pool, whale.id).await, 1);
}

#[tokio::test]
async fn replay_refreshes_late_fields_without_new_row() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "perp").await;
    let whale = common::seed_whale(&pool, "perp", "0xreplay01").await;

    let mut trade = common::make_trade(
        &whale,
        &chain,
        TradeDirection::CloseLong,
        "ETH",
        dec!(-2),
        Some(dec!(6000)),
        Some("0xfill1"),
        1,
    );
    common::insert_trade(&pool, &trade).await;

    // The ledger reports realized PnL on a later replay of the same fill.
    trade.pnl_usd = Some(dec!(400));
    common::insert_trade(&pool, &trade).await;

    let trades = trade_repo::list_trades_asc(&pool, whale.id).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].pnl_usd, Some(dec!(400)));
}

#[tokio::test]
async fn perp_close_stores_signed_negative_size() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "perp").await;
    let whale = common::seed_whale(&pool, "perp", "0xsigned01").await;

    let open = common::make_trade(
        &whale,
        &chain,
        TradeDirection::Long,
        "ETH",
        dec!(0.5),
        Some(dec!(1500)),
        Some("0xopen"),
        2,
    );
    let close = common::make_trade(
        &whale,
        &chain,
        TradeDirection::CloseLong,
        "ETH",
        dec!(-0.5),
        Some(dec!(1600)),
        Some("0xclose"),
        1,
    );
    common::insert_trade(&pool, &open).await;
    common::insert_trade(&pool, &close).await;

    let trades = trade_repo::list_trades_asc(&pool, whale.id).await.unwrap();
    assert_eq!(trades[1].amount_base, Some(dec!(-0.5)));

    // Net position after the close is flat.
    let net: rust_decimal::Decimal = trades.iter().filter_map(|t| t.amount_base).sum();
    assert_eq!(net, dec!(0));
}

#[tokio::test]
async fn unknown_price_trade_persists_with_null_value() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "utxo").await;
    let whale = common::seed_whale(&pool, "utxo", "bc1qnullprice").await;

    let trade = common::make_trade(
        &whale,
        &chain,
        TradeDirection::Deposit,
        "BTC",
        dec!(3),
        None,
        Some("txid-nullvalue"),
        1,
    );
    common::insert_trade(&pool, &trade).await;

    let trades = trade_repo::list_trades_asc(&pool, whale.id).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].value_usd, None);

    // Volume aggregates exclude it; the count does not.
    let (volume, count) =
        trade_repo::volume_and_count_since(&pool, whale.id, Utc::now() - Duration::days(7))
            .await
            .unwrap();
    assert_eq!(volume, dec!(0));
    assert_eq!(count, 1);
}

#[tokio::test]
async fn checkpoint_advances_monotonically() {
    let pool = common::setup_test_db().await;
    let whale = common::seed_whale(&pool, "perp", "0xcheckpoint01").await;

    let mut conn = pool.acquire().await.unwrap();

    let mut cp = IngestionCheckpoint::empty(whale.id, "perp");
    cp.last_fill_time = Some(200);
    checkpoint_repo::advance_checkpoint(&mut conn, &cp).await.unwrap();

    // A replayed batch reporting an older cursor must not move it back.
    cp.last_fill_time = Some(150);
    checkpoint_repo::advance_checkpoint(&mut conn, &cp).await.unwrap();

    let stored = checkpoint_repo::get_checkpoint(&pool, whale.id, "perp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_fill_time, Some(200));

    cp.last_fill_time = Some(250);
    checkpoint_repo::advance_checkpoint(&mut conn, &cp).await.unwrap();

    let stored = checkpoint_repo::get_checkpoint(&pool, whale.id, "perp")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_fill_time, Some(250));
}

#[tokio::test]
async fn cursor_pagination_never_duplicates_or_skips() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "evm").await;
    let whale = common::seed_whale(&pool, "evm", "0xcursor01").await;

    let base = Utc::now() - Duration::days(1);
    for i in 0..25 {
        let trade = common::make_trade_at(
            &whale,
            &chain,
            TradeDirection::Buy,
            "ETH",
            dec!(1),
            Some(dec!(3000)),
            Some(&format!("0xcursor{i}")),
            base + Duration::minutes(i),
        );
        common::insert_trade(&pool, &trade).await;
    }

    let filters = TradeFilters::default();
    let mut seen: Vec<i64> = Vec::new();
    let mut cursor: Option<TradeCursor> = None;

    loop {
        let page = trade_repo::query_trades(&pool, whale.id, &filters, cursor, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 25);

        for pair in page.items.windows(2) {
            assert!(
                (pair[0].timestamp, pair[0].id) > (pair[1].timestamp, pair[1].id),
                "page ordering must be (timestamp, id) descending"
            );
        }
        seen.extend(page.items.iter().map(|t| t.id));

        // A concurrent insert newer than the first page must not disturb
        // later pages.
        if seen.len() == 10 {
            let late = common::make_trade_at(
                &whale,
                &chain,
                TradeDirection::Sell,
                "ETH",
                dec!(1),
                Some(dec!(3100)),
                Some("0xcursor-late"),
                base + Duration::minutes(60),
            );
            common::insert_trade(&pool, &late).await;
        }

        match page.next_cursor {
            Some(raw) => cursor = Some(TradeCursor::decode(&raw).expect("valid cursor")),
            None => break,
        }
    }

    assert_eq!(seen.len(), 25);
    let mut deduped = seen.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(deduped.len(), 25, "no id may repeat across pages");
}

#[tokio::test]
async fn batch_commit_is_atomic_and_gates_events_by_threshold() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "evm").await;
    let whale = common::seed_whale(&pool, "evm", "0xbatch01").await;
    let deps = common::collector_deps(&pool, common::default_thresholds());

    let mut subscriber_a = deps.broadcaster.subscribe();
    let mut subscriber_b = deps.broadcaster.subscribe();

    let below = common::make_trade(
        &whale,
        &chain,
        TradeDirection::Buy,
        "ETH",
        dec!(100),
        Some(dec!(499999)),
        Some("0xbelow"),
        0,
    );
    let above = common::make_trade(
        &whale,
        &chain,
        TradeDirection::Buy,
        "ETH",
        dec!(200),
        Some(dec!(500001)),
        Some("0xabove"),
        0,
    );

    let event = |summary: &str| PendingEvent {
        event_type: EventType::LargeSwap,
        summary: summary.into(),
        details: json!({}),
    };

    let mut checkpoint = IngestionCheckpoint::empty(whale.id, "evm");
    checkpoint.last_block_height = Some(100);

    let batch = WalletBatch {
        items: vec![
            BatchItem { trade: below, event: Some(event("below")) },
            BatchItem { trade: above, event: Some(event("above")) },
        ],
        checkpoint,
        holdings: None,
    };

    let stats = commit_wallet_batch(&deps, &whale, &chain, batch).await.unwrap();
    assert_eq!(stats.trades, 2);
    assert_eq!(stats.events, 1, "only the above-threshold trade emits");

    // Exactly one delivery per connected subscriber.
    let received_a = subscriber_a.recv().await.unwrap();
    assert_eq!(received_a.summary, "above");
    assert!(subscriber_a.try_recv().is_err());

    let received_b = subscriber_b.recv().await.unwrap();
    assert_eq!(received_b.summary, "above");
    assert!(subscriber_b.try_recv().is_err());

    // Checkpoint advanced with the same commit.
    let stored = checkpoint_repo::get_checkpoint(&pool, whale.id, "evm")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_block_height, Some(100));
}

#[tokio::test]
async fn replayed_batch_emits_no_second_event() {
    let pool = common::setup_test_db().await;
    let chain = common::get_chain(&pool, "evm").await;
    let whale = common::seed_whale(&pool, "evm", "0xreplaybatch").await;
    let deps = common::collector_deps(&pool, common::default_thresholds());

    let make_batch = || {
        let trade = common::make_trade(
            &whale,
            &chain,
            TradeDirection::Buy,
            "ETH",
            dec!(500),
            Some(dec!(1000000)),
            Some("0xABC"),
            0,
        );
        WalletBatch {
            items: vec![BatchItem {
                trade,
                event: Some(PendingEvent {
                    event_type: EventType::LargeSwap,
                    summary: "large swap".into(),
                    details: json!({}),
                }),
            }],
            checkpoint: IngestionCheckpoint::empty(whale.id, "evm"),
            holdings: None,
        }
    };

    let mut subscriber = deps.broadcaster.subscribe();

    // Two collector ticks see the same source record.
    commit_wallet_batch(&deps, &whale, &chain, make_batch()).await.unwrap();
    commit_wallet_batch(&deps, &whale, &chain, make_batch()).await.unwrap();

    assert_eq!(common::count_trades_for(&pool, whale.id).await, 1);

    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events WHERE whale_id = $1")
        .bind(whale.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(row.0, 1, "replay must not duplicate the event");

    let delivered = subscriber.recv().await.unwrap();
    assert_eq!(delivered.summary, "large swap");
    assert!(subscriber.try_recv().is_err(), "delivered exactly once");
}
