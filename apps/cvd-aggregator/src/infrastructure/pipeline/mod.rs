//! Ingest Pipeline Tasks
//!
//! The long-running tasks between the stream clients and the aggregator:
//!
//! - [`consume_stream_events`]: single consumer of every shard's events
//! - [`run_sweeper`]: periodic forced close of elapsed windows, plus
//!   publication of aggregator counters as metrics

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AggregatorStats, MinuteAggregator};
use crate::infrastructure::binance::{FeedStates, StreamEvent};
use crate::infrastructure::http::Clock;
use crate::infrastructure::metrics;

/// Apply stream events until every sender is dropped.
///
/// Trades go to the aggregator in channel order. Connection events update
/// shard state. Returns the number of trades applied.
pub async fn consume_stream_events(
    mut rx: mpsc::Receiver<StreamEvent>,
    aggregator: Arc<MinuteAggregator>,
    feeds: FeedStates,
) -> u64 {
    let mut applied = 0u64;

    while let Some(event) = rx.recv().await {
        let shard = event.shard();
        let Some(state) = feeds.shard(shard) else {
            tracing::warn!(shard, "Event from unknown shard");
            continue;
        };

        match event {
            StreamEvent::Trade { trade, .. } => {
                state.record_trade();
                metrics::record_trade_received(shard);
                aggregator.on_trade(&trade);
                applied += 1;
            }
            StreamEvent::Connected { .. } => {
                state.mark_connected();
                metrics::set_connected_shards(feeds.connected());
                tracing::info!(shard, "Shard connected");
            }
            StreamEvent::Disconnected { reason, .. } => {
                state.mark_error(reason);
                metrics::set_connected_shards(feeds.connected());
                tracing::warn!(shard, "Shard disconnected");
            }
            StreamEvent::Reconnecting { attempt, .. } => {
                state.mark_reconnecting(attempt);
                metrics::record_reconnect(shard);
            }
            StreamEvent::Error { message, .. } => {
                tracing::error!(shard, error = %message, "Shard stopped");
                state.mark_failed(message);
                metrics::set_connected_shards(feeds.connected());
            }
        }
    }

    tracing::info!(trades = applied, "Stream event consumer stopped");
    applied
}

/// Sweep every `interval` until cancelled.
///
/// The first sweep runs immediately.
pub async fn run_sweeper(
    aggregator: Arc<MinuteAggregator>,
    interval: Duration,
    clock: Clock,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut publisher = StatsPublisher::default();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let flushed = aggregator.sweep(clock());
                if flushed > 0 {
                    tracing::debug!(flushed, "Sweep closed idle windows");
                }
                publisher.publish(aggregator.stats());
            }
        }
    }

    publisher.publish(aggregator.stats());
    tracing::info!("Sweeper stopped");
}

/// Turns cumulative aggregator counters into metric increments.
#[derive(Debug, Default)]
pub struct StatsPublisher {
    last: AggregatorStats,
}

impl StatsPublisher {
    /// Record the change since the previous call.
    pub fn publish(&mut self, stats: AggregatorStats) {
        let delta = |now: u64, before: u64| now.saturating_sub(before);

        metrics::record_buckets_flushed(delta(stats.buckets_flushed, self.last.buckets_flushed));
        metrics::record_buckets_lost(delta(stats.buckets_lost, self.last.buckets_lost));
        metrics::record_late_events(delta(stats.late_events_dropped, self.last.late_events_dropped));
        metrics::set_symbols_tracked(stats.symbols_tracked);

        self.last = stats;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cvd::{Direction, TradeEvent};
    use rust_decimal_macros::dec;

    const T0: i64 = 1_704_067_200_000;

    fn trade(shard: usize, ts: i64) -> StreamEvent {
        StreamEvent::Trade {
            shard,
            trade: TradeEvent::new("BTCUSDT", dec!(1), dec!(100), Direction::Buy, ts),
        }
    }

    #[tokio::test]
    async fn consumer_applies_trades_and_tracks_shards() {
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel();
        let aggregator = Arc::new(MinuteAggregator::new(Arc::new(flush_tx)));
        let feeds = FeedStates::new(&[2, 2]);

        let (tx, rx) = mpsc::channel(16);
        tx.send(StreamEvent::Connected { shard: 1 }).await.unwrap();
        tx.send(trade(1, T0)).await.unwrap();
        tx.send(trade(1, T0 + 60_000)).await.unwrap();
        tx.send(trade(7, T0)).await.unwrap();
        drop(tx);

        let applied = consume_stream_events(rx, Arc::clone(&aggregator), feeds.clone()).await;

        assert_eq!(applied, 2);
        assert_eq!(feeds.connected(), 1);
        assert_eq!(feeds.shard(1).unwrap().info().trades_received, 2);
        assert_eq!(aggregator.running_total("BTCUSDT"), Some(dec!(200)));
        assert_eq!(flush_rx.try_recv().unwrap().value, dec!(100));
    }

    #[tokio::test]
    async fn consumer_records_failure() {
        let (flush_tx, _flush_rx) = mpsc::unbounded_channel();
        let aggregator = Arc::new(MinuteAggregator::new(Arc::new(flush_tx)));
        let feeds = FeedStates::new(&[1]);

        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamEvent::Error {
            shard: 0,
            message: "maximum reconnection attempts exceeded".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        consume_stream_events(rx, aggregator, feeds.clone()).await;
        let info = feeds.shard(0).unwrap().info();
        assert_eq!(info.state, crate::infrastructure::binance::ConnectionState::Failed);
        assert!(info.last_error.is_some());
    }

    fn far_future() -> i64 {
        T0 + 3_600_000
    }

    #[tokio::test]
    async fn sweeper_closes_elapsed_windows() {
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel();
        let aggregator = Arc::new(MinuteAggregator::new(Arc::new(flush_tx)));
        aggregator.on_trade(&TradeEvent::new("ETHUSDT", dec!(2), dec!(10), Direction::Sell, T0));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            Arc::clone(&aggregator),
            Duration::from_millis(10),
            far_future,
            cancel.clone(),
        ));

        let bucket = tokio::time::timeout(Duration::from_secs(2), flush_rx.recv())
            .await
            .unwrap()
            .unwrap();
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(bucket.symbol, "ETHUSDT");
        assert_eq!(bucket.value, dec!(-20));
        assert!(aggregator.snapshot("ETHUSDT").unwrap().open_minute.is_none());
    }
}
