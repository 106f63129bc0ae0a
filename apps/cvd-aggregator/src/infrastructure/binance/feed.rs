//! Shard Connection State
//!
//! Per-connection status shared between the stream event consumer (writer)
//! and the health server (reader).

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection state of one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not yet connected.
    Connecting,
    /// Receiving frames.
    Connected,
    /// Waiting out a backoff delay.
    Reconnecting,
    /// Gave up after exhausting reconnect attempts.
    Failed,
}

/// Status of one stream connection.
#[derive(Debug)]
pub struct ShardState {
    index: usize,
    symbols: usize,
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    trades_received: AtomicU64,
}

impl ShardState {
    /// Create state for shard `index` carrying `symbols` streams.
    #[must_use]
    pub const fn new(index: usize, symbols: usize) -> Self {
        Self {
            index,
            symbols,
            state: parking_lot::RwLock::new(ConnectionState::Connecting),
            last_connected_at: parking_lot::RwLock::new(None),
            last_error: parking_lot::RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            trades_received: AtomicU64::new(0),
        }
    }

    /// Mark connected and clear the reconnect counter.
    pub fn mark_connected(&self) {
        *self.state.write() = ConnectionState::Connected;
        *self.last_connected_at.write() = Some(Utc::now());
        *self.last_error.write() = None;
        self.reconnect_attempts.store(0, Ordering::Relaxed);
    }

    /// Mark waiting to reconnect.
    pub fn mark_reconnecting(&self, attempt: u32) {
        *self.state.write() = ConnectionState::Reconnecting;
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Mark disconnected with the error that caused it.
    pub fn mark_error(&self, message: String) {
        *self.state.write() = ConnectionState::Reconnecting;
        *self.last_error.write() = Some(message);
    }

    /// Mark permanently failed.
    pub fn mark_failed(&self, message: String) {
        *self.state.write() = ConnectionState::Failed;
        *self.last_error.write() = Some(message);
    }

    /// Count one decoded trade.
    pub fn record_trade(&self) {
        self.trades_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the shard is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Point-in-time view for reporting.
    #[must_use]
    pub fn info(&self) -> ShardInfo {
        ShardInfo {
            shard: self.index,
            symbols: self.symbols,
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            trades_received: self.trades_received.load(Ordering::Relaxed),
        }
    }
}

/// Serializable shard status.
#[derive(Debug, Clone, Serialize)]
pub struct ShardInfo {
    /// Shard index.
    pub shard: usize,
    /// Number of symbol streams on this connection.
    pub symbols: usize,
    /// Connection state.
    pub state: ConnectionState,
    /// Last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error, cleared on connect.
    pub last_error: Option<String>,
    /// Reconnect attempts since the last connect.
    pub reconnect_attempts: u32,
    /// Trades decoded on this shard.
    pub trades_received: u64,
}

/// Status of all shards.
#[derive(Debug, Clone, Default)]
pub struct FeedStates {
    shards: Vec<Arc<ShardState>>,
}

impl FeedStates {
    /// One state per shard, sized by the number of symbols in each.
    #[must_use]
    pub fn new(shard_sizes: &[usize]) -> Self {
        Self {
            shards: shard_sizes
                .iter()
                .enumerate()
                .map(|(i, n)| Arc::new(ShardState::new(i, *n)))
                .collect(),
        }
    }

    /// State of shard `index`.
    #[must_use]
    pub fn shard(&self, index: usize) -> Option<&Arc<ShardState>> {
        self.shards.get(index)
    }

    /// Total number of shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether there are no shards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Number of connected shards.
    #[must_use]
    pub fn connected(&self) -> usize {
        self.shards.iter().filter(|s| s.is_connected()).count()
    }

    /// Snapshot of every shard.
    #[must_use]
    pub fn infos(&self) -> Vec<ShardInfo> {
        self.shards.iter().map(|s| s.info()).collect()
    }
}
