//! Query API Integration Tests
//!
//! Drives the API router against a Turso store populated through the
//! aggregator and flush writer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cvd_aggregator::{
    ApiServer, ApiState, CommandDefaults, CvdStore, Direction, FlushWriter, MINUTE_MS,
    MinuteAggregator, QueryService, TradeEvent, TursoCvdStore,
};

const T0: i64 = 1_704_067_200_000;

fn now() -> i64 {
    T0 + 10 * MINUTE_MS
}

/// Router over a store holding three closed minutes of BTCUSDT and one of
/// ETHUSDT, with BTCUSDT's latest minute still open in memory.
async fn app() -> Router {
    let store: Arc<dyn CvdStore> = Arc::new(TursoCvdStore::in_memory().await.unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let aggregator = Arc::new(MinuteAggregator::new(Arc::new(tx)));
    let stop = CancellationToken::new();
    let writer = tokio::spawn(FlushWriter::new(Arc::clone(&store), rx, 3).run(stop.clone()));

    let trades = [
        ("BTCUSDT", dec!(1), Direction::Buy, T0),
        ("ETHUSDT", dec!(9), Direction::Sell, T0 + 5_000),
        ("BTCUSDT", dec!(2), Direction::Sell, T0 + MINUTE_MS),
        ("BTCUSDT", dec!(4), Direction::Buy, T0 + 2 * MINUTE_MS),
        ("BTCUSDT", dec!(1), Direction::Buy, T0 + 3 * MINUTE_MS),
    ];
    for (symbol, qty, direction, ts) in trades {
        aggregator.on_trade(&TradeEvent::new(symbol, qty, dec!(100), direction, ts));
    }
    aggregator.sweep(T0 + 2 * MINUTE_MS);

    stop.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.persisted, 4);

    let state = ApiState::new(
        QueryService::new(store, "USDT"),
        aggregator,
        CommandDefaults::default(),
    )
    .with_clock(now);
    ApiServer::router(state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let resp = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn symbol_sum_over_persisted_minutes() {
    let (status, json) = get(app().await, "/api/v1/cvd/btc?minutes=60").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["symbol"], "BTCUSDT");
    assert_eq!(json["value"], "300");
}

#[tokio::test]
async fn bucket_history_is_newest_first() {
    let (status, json) = get(app().await, "/api/v1/cvd/BTCUSDT/buckets?limit=2").await;

    assert_eq!(status, StatusCode::OK);
    let buckets = json.as_array().unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0]["minute"], T0 + 2 * MINUTE_MS);
    assert_eq!(buckets[0]["value"], "400");
    assert_eq!(buckets[1]["minute"], T0 + MINUTE_MS);
}

#[tokio::test]
async fn top_lists_largest_absolute_first() {
    let (status, json) = get(app().await, "/api/v1/top?minutes=60&limit=5").await;

    assert_eq!(status, StatusCode::OK);
    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries[0]["symbol"], "ETHUSDT");
    assert_eq!(entries[0]["value"], "-900");
    assert_eq!(entries[1]["symbol"], "BTCUSDT");
    assert_eq!(json["minutes"], 10);
}

#[tokio::test]
async fn live_view_shows_open_window() {
    let (status, json) = get(app().await, "/api/v1/live/btc").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["open_minute"], T0 + 3 * MINUTE_MS);
    assert_eq!(json["open_value"], "100");
    assert_eq!(json["running_total"], "400");
}

#[tokio::test]
async fn unknown_symbol_is_not_found() {
    let (status, _) = get(app().await, "/api/v1/cvd/doge?minutes=60").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
