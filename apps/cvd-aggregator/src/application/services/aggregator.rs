//! Streaming Minute Aggregator
//!
//! Folds trade events into per-symbol running totals and one-minute
//! buckets, emitting each bucket exactly once when its window closes.
//!
//! # Closing rules
//!
//! - A window closes when the first trade of a later minute arrives for
//!   the same symbol.
//! - [`MinuteAggregator::sweep`] force-closes windows whose minute has
//!   fully elapsed (plus a grace period), so quiet symbols still flush.
//! - [`MinuteAggregator::drain`] closes everything at shutdown.
//!
//! # Late trades
//!
//! A trade whose minute precedes the open window, or that falls into a
//! window already closed, is dropped from bucket values and counted. It
//! still contributes to the symbol's running total.
//!
//! # Concurrency
//!
//! All symbols share one mutex. Closed buckets are pushed onto the
//! [`FlushQueue`] before the lock is released, which keeps per-symbol
//! emission order identical to the order of state transitions. The queue
//! is non-blocking; persistence runs on the other side of it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::application::ports::FlushQueue;
use crate::domain::cvd::{FinalizedBucket, MinuteWindow, SymbolState, TradeEvent, WindowTransition};

/// Default delay after a minute ends before the sweep force-closes it.
pub const DEFAULT_SWEEP_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// Views
// =============================================================================

/// Counters describing aggregator activity since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    /// Trades applied (including late ones).
    pub trades_processed: u64,
    /// Buckets handed to the flush queue.
    pub buckets_flushed: u64,
    /// Trades dropped from bucket values because their window had passed.
    pub late_events_dropped: u64,
    /// Buckets that could not be enqueued because the queue was closed.
    pub buckets_lost: u64,
    /// Number of symbols with live state.
    pub symbols_tracked: usize,
}

/// Point-in-time view of one symbol's live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolSnapshot {
    /// Instrument identifier.
    pub symbol: String,
    /// Cumulative signed notional since start.
    pub running_total: Decimal,
    /// Window currently accumulating.
    pub open_minute: Option<MinuteWindow>,
    /// Value of the open window.
    pub open_value: Option<Decimal>,
    /// Most recently closed window.
    pub last_closed_minute: Option<MinuteWindow>,
}

impl SymbolSnapshot {
    fn from_state(symbol: &str, state: &SymbolState) -> Self {
        let open = state.open_window();
        Self {
            symbol: symbol.to_string(),
            running_total: state.running_total(),
            open_minute: open.map(|o| o.window),
            open_value: open.map(|o| o.value),
            last_closed_minute: state.last_closed(),
        }
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Per-symbol minute-bucket aggregator.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use cvd_aggregator::MinuteAggregator;
/// use cvd_aggregator::domain::cvd::{Direction, TradeEvent};
/// use rust_decimal::Decimal;
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let aggregator = MinuteAggregator::new(Arc::new(tx));
///
/// let hundred = Decimal::from(100);
/// aggregator.on_trade(&TradeEvent::new("BTCUSDT", Decimal::ONE, hundred, Direction::Buy, 10_000));
/// aggregator.on_trade(&TradeEvent::new("BTCUSDT", Decimal::ONE, hundred, Direction::Buy, 65_000));
///
/// let bucket = rx.try_recv().unwrap();
/// assert_eq!(bucket.minute.start_ms(), 0);
/// assert_eq!(bucket.value, hundred);
/// ```
pub struct MinuteAggregator {
    states: Mutex<HashMap<String, SymbolState>>,
    flush_queue: Arc<dyn FlushQueue>,
    sweep_grace_ms: i64,
    trades_processed: AtomicU64,
    buckets_flushed: AtomicU64,
    late_events_dropped: AtomicU64,
    buckets_lost: AtomicU64,
}

impl MinuteAggregator {
    /// Create an aggregator that hands closed buckets to `flush_queue`.
    #[must_use]
    pub fn new(flush_queue: Arc<dyn FlushQueue>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            flush_queue,
            sweep_grace_ms: duration_ms(DEFAULT_SWEEP_GRACE),
            trades_processed: AtomicU64::new(0),
            buckets_flushed: AtomicU64::new(0),
            late_events_dropped: AtomicU64::new(0),
            buckets_lost: AtomicU64::new(0),
        }
    }

    /// Set how long after a minute ends the sweep waits before closing it.
    #[must_use]
    pub fn with_sweep_grace(mut self, grace: Duration) -> Self {
        self.sweep_grace_ms = duration_ms(grace);
        self
    }

    /// Apply one trade.
    ///
    /// Returns the window transition the trade caused. If it closed a
    /// window, the bucket has already been enqueued when this returns.
    pub fn on_trade(&self, event: &TradeEvent) -> WindowTransition {
        let notional = event.signed_notional();
        let window = event.window();

        let mut states = self.states.lock();
        let state = states.entry(event.symbol.clone()).or_default();
        let transition = state.apply(&event.symbol, window, notional);

        match &transition {
            WindowTransition::Rolled { flushed, .. } => self.hand_off(flushed.clone()),
            WindowTransition::Late { window, current } => {
                self.late_events_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    symbol = %event.symbol,
                    window = %window,
                    current = %current,
                    "Late trade dropped from minute buckets"
                );
            }
            WindowTransition::Opened(_) | WindowTransition::Accumulated(_) => {}
        }
        drop(states);

        self.trades_processed.fetch_add(1, Ordering::Relaxed);
        transition
    }

    /// Force-close every open window that ended at least the grace period
    /// before `now_ms`.
    ///
    /// Returns the number of buckets flushed.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(self.sweep_grace_ms);
        let mut states = self.states.lock();
        let mut flushed = 0;

        for (symbol, state) in states.iter_mut() {
            if let Some(bucket) = state.close_if_ended(symbol, cutoff) {
                self.hand_off(bucket);
                flushed += 1;
            }
        }

        flushed
    }

    /// Close every open window regardless of age.
    ///
    /// Intended for shutdown. Returns the number of buckets flushed.
    pub fn drain(&self) -> usize {
        let mut states = self.states.lock();
        let mut flushed = 0;

        for (symbol, state) in states.iter_mut() {
            if let Some(bucket) = state.close(symbol) {
                self.hand_off(bucket);
                flushed += 1;
            }
        }

        flushed
    }

    /// Running total for a symbol, if it has traded.
    #[must_use]
    pub fn running_total(&self, symbol: &str) -> Option<Decimal> {
        self.states.lock().get(symbol).map(SymbolState::running_total)
    }

    /// Live view of one symbol.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        self.states
            .lock()
            .get(symbol)
            .map(|state| SymbolSnapshot::from_state(symbol, state))
    }

    /// Live view of every tracked symbol, sorted by symbol.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SymbolSnapshot> {
        let mut all: Vec<SymbolSnapshot> = self
            .states
            .lock()
            .iter()
            .map(|(symbol, state)| SymbolSnapshot::from_state(symbol, state))
            .collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            trades_processed: self.trades_processed.load(Ordering::Relaxed),
            buckets_flushed: self.buckets_flushed.load(Ordering::Relaxed),
            late_events_dropped: self.late_events_dropped.load(Ordering::Relaxed),
            buckets_lost: self.buckets_lost.load(Ordering::Relaxed),
            symbols_tracked: self.states.lock().len(),
        }
    }

    /// Must be called with the state lock held.
    fn hand_off(&self, bucket: FinalizedBucket) {
        tracing::debug!(
            symbol = %bucket.symbol,
            minute = %bucket.minute,
            value = %bucket.value,
            "Minute bucket closed"
        );

        match self.flush_queue.enqueue(bucket) {
            Ok(()) => {
                self.buckets_flushed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.buckets_lost.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Bucket not handed to persistence");
            }
        }
    }
}

impl std::fmt::Debug for MinuteAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinuteAggregator")
            .field("sweep_grace_ms", &self.sweep_grace_ms)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cvd::Direction;
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;

    /// 2024-01-01T00:00:00Z
    const T0: i64 = 1_704_067_200_000;

    fn trade(symbol: &str, qty: Decimal, price: Decimal, dir: Direction, secs: i64) -> TradeEvent {
        TradeEvent::new(symbol, qty, price, dir, T0 + secs * 1_000)
    }

    fn setup() -> (MinuteAggregator, mpsc::UnboundedReceiver<FinalizedBucket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MinuteAggregator::new(Arc::new(tx)), rx)
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<FinalizedBucket>) -> Vec<FinalizedBucket> {
        let mut out = Vec::new();
        while let Ok(b) = rx.try_recv() {
            out.push(b);
        }
        out
    }

    #[test]
    fn btcusdt_scenario_flushes_first_minute_only() {
        let (agg, mut rx) = setup();

        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 10));
        agg.on_trade(&trade("BTCUSDT", dec!(2), dec!(100), Direction::Sell, 50));
        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 65));

        let flushed = collect(&mut rx);
        assert_eq!(
            flushed,
            vec![FinalizedBucket {
                symbol: "BTCUSDT".to_string(),
                minute: MinuteWindow::containing(T0),
                value: dec!(-100),
            }]
        );

        let snap = agg.snapshot("BTCUSDT").unwrap();
        assert_eq!(snap.open_minute, Some(MinuteWindow::containing(T0 + 60_000)));
        assert_eq!(snap.open_value, Some(dec!(100)));
        assert_eq!(snap.running_total, dec!(0));
    }

    #[test]
    fn same_minute_sum_is_exact() {
        let (agg, mut rx) = setup();
        agg.on_trade(&trade("ETHUSDT", dec!(0.1), dec!(2500.5), Direction::Buy, 1));
        agg.on_trade(&trade("ETHUSDT", dec!(0.3), dec!(2500.7), Direction::Sell, 2));
        agg.on_trade(&trade("ETHUSDT", dec!(1.2), dec!(2499.9), Direction::Buy, 59));
        agg.drain();

        let flushed = collect(&mut rx);
        assert_eq!(flushed.len(), 1);
        // 250.05 - 750.21 + 2999.88
        assert_eq!(flushed[0].value, dec!(2499.72));
    }

    #[test]
    fn skipped_minutes_produce_no_empty_buckets() {
        let (agg, mut rx) = setup();
        agg.on_trade(&trade("SOLUSDT", dec!(1), dec!(10), Direction::Buy, 0));
        agg.on_trade(&trade("SOLUSDT", dec!(1), dec!(10), Direction::Buy, 600));

        let flushed = collect(&mut rx);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].minute, MinuteWindow::containing(T0));
    }

    #[test]
    fn late_trade_is_counted_and_not_flushed() {
        let (agg, mut rx) = setup();
        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 10));
        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 70));
        let late = agg.on_trade(&trade("BTCUSDT", dec!(5), dec!(100), Direction::Buy, 20));

        assert!(late.is_late());
        assert_eq!(agg.stats().late_events_dropped, 1);
        assert_eq!(agg.running_total("BTCUSDT"), Some(dec!(700)));

        let flushed = collect(&mut rx);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].value, dec!(100));

        // Open window unaffected by the late trade
        assert_eq!(agg.snapshot("BTCUSDT").unwrap().open_value, Some(dec!(100)));
    }

    #[test]
    fn sweep_closes_only_elapsed_windows() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agg = MinuteAggregator::new(Arc::new(tx)).with_sweep_grace(Duration::from_secs(5));

        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 10));
        agg.on_trade(&trade("ETHUSDT", dec!(1), dec!(10), Direction::Sell, 62));

        // BTC window ends at +60s; grace puts the cutoff at +65s
        assert_eq!(agg.sweep(T0 + 64_000), 0);
        assert_eq!(agg.sweep(T0 + 65_000), 1);

        let flushed = collect(&mut rx);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].symbol, "BTCUSDT");
        assert!(agg.snapshot("BTCUSDT").unwrap().open_minute.is_none());
        assert!(agg.snapshot("ETHUSDT").unwrap().open_minute.is_some());

        // A straggler for the swept minute is late
        assert!(agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 59)).is_late());
        // A trade in the next minute opens a fresh window without flushing
        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 70));
        assert!(collect(&mut rx).is_empty());
    }

    #[test]
    fn drain_flushes_every_open_window_once() {
        let (agg, mut rx) = setup();
        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 10));
        agg.on_trade(&trade("ETHUSDT", dec!(1), dec!(10), Direction::Sell, 10));

        assert_eq!(agg.drain(), 2);
        assert_eq!(agg.drain(), 0);

        let mut flushed = collect(&mut rx);
        flushed.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].symbol, "BTCUSDT");
        assert_eq!(flushed[1].value, dec!(-10));
    }

    #[test]
    fn closed_queue_counts_lost_bucket_without_rollback() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let agg = MinuteAggregator::new(Arc::new(tx));

        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 10));
        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(100), Direction::Buy, 70));

        let stats = agg.stats();
        assert_eq!(stats.buckets_lost, 1);
        assert_eq!(stats.buckets_flushed, 0);
        assert_eq!(
            agg.snapshot("BTCUSDT").unwrap().last_closed_minute,
            Some(MinuteWindow::containing(T0))
        );
    }

    #[test]
    fn oversized_trades_saturate_without_panicking() {
        let (agg, mut rx) = setup();
        agg.on_trade(&trade("BTCUSDT", dec!(2), Decimal::MAX, Direction::Buy, 1));
        agg.on_trade(&trade("BTCUSDT", dec!(2), Decimal::MAX, Direction::Buy, 2));
        agg.on_trade(&trade("BTCUSDT", dec!(1), dec!(1), Direction::Buy, 61));

        let buckets = collect(&mut rx);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].value, Decimal::MAX);
        assert_eq!(agg.running_total("BTCUSDT"), Some(Decimal::MAX));
    }

    #[test]
    fn stats_track_activity() {
        let (agg, _rx) = setup();
        agg.on_trade(&trade("A", dec!(1), dec!(1), Direction::Buy, 0));
        agg.on_trade(&trade("B", dec!(1), dec!(1), Direction::Buy, 0));
        agg.on_trade(&trade("A", dec!(1), dec!(1), Direction::Buy, 61));

        let stats = agg.stats();
        assert_eq!(stats.trades_processed, 3);
        assert_eq!(stats.buckets_flushed, 1);
        assert_eq!(stats.symbols_tracked, 2);
    }

    #[test]
    fn snapshots_sorted_by_symbol() {
        let (agg, _rx) = setup();
        agg.on_trade(&trade("XRPUSDT", dec!(1), dec!(1), Direction::Buy, 0));
        agg.on_trade(&trade("ADAUSDT", dec!(1), dec!(1), Direction::Buy, 0));
        let symbols: Vec<_> = agg.snapshots().into_iter().map(|s| s.symbol).collect();
        assert_eq!(symbols, vec!["ADAUSDT", "XRPUSDT"]);
    }
}
