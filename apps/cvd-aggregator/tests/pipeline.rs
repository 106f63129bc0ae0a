//! Pipeline Integration Tests
//!
//! Trades flow through the aggregator, the flush writer and a real Turso
//! store, then come back out of the query and command services.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use cvd_aggregator::{
    Command, CommandDefaults, CvdStore, Direction, FlushWriter, MINUTE_MS, MinuteAggregator,
    QueryError, QueryService, TradeEvent, TursoCvdStore,
};

const T0: i64 = 1_704_067_200_000;

fn buy(symbol: &str, qty: rust_decimal::Decimal, ts: i64) -> TradeEvent {
    TradeEvent::new(symbol, qty, dec!(100), Direction::Buy, ts)
}

fn sell(symbol: &str, qty: rust_decimal::Decimal, ts: i64) -> TradeEvent {
    TradeEvent::new(symbol, qty, dec!(100), Direction::Sell, ts)
}

/// Apply trades, drain, and wait for the writer to persist everything.
async fn run_pipeline(store: Arc<dyn CvdStore>, trades: &[TradeEvent]) -> u64 {
    let (tx, rx) = mpsc::unbounded_channel();
    let aggregator = MinuteAggregator::new(Arc::new(tx));
    let stop = CancellationToken::new();
    let writer = tokio::spawn(FlushWriter::new(Arc::clone(&store), rx, 3).run(stop.clone()));

    for trade in trades {
        aggregator.on_trade(trade);
    }
    aggregator.drain();
    stop.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.failed, 0);
    stats.persisted
}

#[tokio::test]
async fn trades_become_queryable_sums() {
    let store: Arc<dyn CvdStore> = Arc::new(TursoCvdStore::in_memory().await.unwrap());

    let persisted = run_pipeline(
        Arc::clone(&store),
        &[
            buy("BTCUSDT", dec!(1), T0 + 10_000),
            sell("BTCUSDT", dec!(2), T0 + 50_000),
            buy("BTCUSDT", dec!(1), T0 + 65_000),
            sell("ETHUSDT", dec!(5), T0 + 70_000),
            buy("BTCUSDT", dec!(3), T0 + 2 * MINUTE_MS + 1_000),
        ],
    )
    .await;
    assert_eq!(persisted, 4);

    let queries = QueryService::new(store, "USDT");
    let now = T0 + 3 * MINUTE_MS;

    let sum = assert_ok!(queries.symbol_sum("btc", 10, now).await);
    assert_eq!(sum.symbol, "BTCUSDT");
    assert_eq!(sum.value, dec!(300));

    // Last two minutes only: 00:01 and 00:02.
    let recent_sum = assert_ok!(queries.symbol_sum("BTCUSDT", 2, now).await);
    assert_eq!(recent_sum.value, dec!(400));

    let buckets = assert_ok!(queries.recent("btc", 10).await);
    let minutes: Vec<i64> = buckets.iter().map(|b| b.minute.start_ms()).collect();
    assert_eq!(minutes, vec![T0 + 2 * MINUTE_MS, T0 + MINUTE_MS, T0]);
}

#[tokio::test]
async fn top_ranks_by_absolute_value() {
    let store: Arc<dyn CvdStore> = Arc::new(TursoCvdStore::in_memory().await.unwrap());

    run_pipeline(
        Arc::clone(&store),
        &[
            buy("BTCUSDT", dec!(1), T0),
            sell("ETHUSDT", dec!(7), T0 + 1_000),
            buy("SOLUSDT", dec!(3), T0 + 2_000),
        ],
    )
    .await;

    let queries = QueryService::new(store, "USDT");
    let top = assert_ok!(queries.top(60, 2, T0 + 5 * MINUTE_MS).await);

    let symbols: Vec<&str> = top.entries.iter().map(|e| e.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["ETHUSDT", "SOLUSDT"]);
    assert_eq!(top.entries[0].value, dec!(-700));
    assert_eq!(top.requested_minutes, 60);
    assert!(top.minutes <= 60);
}

#[tokio::test]
async fn replayed_bucket_overwrites_instead_of_duplicating() {
    let store: Arc<dyn CvdStore> = Arc::new(TursoCvdStore::in_memory().await.unwrap());

    run_pipeline(Arc::clone(&store), &[buy("BTCUSDT", dec!(1), T0)]).await;
    run_pipeline(Arc::clone(&store), &[sell("BTCUSDT", dec!(4), T0 + 30_000)]).await;

    let buckets = assert_ok!(store.recent_buckets("BTCUSDT", 10).await);
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].value, dec!(-400));
}

#[tokio::test]
async fn empty_store_reports_no_data() {
    let store: Arc<dyn CvdStore> = Arc::new(TursoCvdStore::in_memory().await.unwrap());
    let queries = QueryService::new(store, "USDT");

    assert!(matches!(
        queries.symbol_sum("btc", 60, T0).await,
        Err(QueryError::NoData)
    ));
    assert!(matches!(queries.top(60, 5, T0).await, Err(QueryError::NoData)));

    let reply = Command::parse("/topcvd", CommandDefaults::default())
        .execute(&queries, CommandDefaults::default(), T0)
        .await;
    assert_eq!(reply, "No CVD data stored yet");
}

#[tokio::test]
async fn command_reply_reads_persisted_history() {
    let store: Arc<dyn CvdStore> = Arc::new(TursoCvdStore::in_memory().await.unwrap());
    run_pipeline(
        Arc::clone(&store),
        &[sell("BTCUSDT", dec!(12.345), T0), buy("BTCUSDT", dec!(1), T0 + MINUTE_MS)],
    )
    .await;

    let queries = QueryService::new(store, "USDT");
    let defaults = CommandDefaults::default();
    let reply = Command::parse("/cvd btc 60", defaults)
        .execute(&queries, defaults, T0 + 2 * MINUTE_MS)
        .await;

    assert!(reply.contains("BTCUSDT"), "{reply}");
    assert!(reply.contains("60 minutes"), "{reply}");
    assert!(reply.contains("-1 135 $"), "{reply}");
}
