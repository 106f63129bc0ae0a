//! Port Interfaces
//!
//! Contracts between the application services and the infrastructure
//! adapters.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`FlushQueue`]: non-blocking hand-off of closed buckets from the
//!   aggregator, called while the aggregator lock is held
//! - [`CvdStore`]: durable bucket storage and the summary queries served
//!   from it

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::cvd::{FinalizedBucket, MinuteWindow};

// =============================================================================
// Flush Queue
// =============================================================================

/// Error returned when the flush queue no longer accepts buckets.
#[derive(Debug, thiserror::Error)]
#[error("flush queue closed, bucket for {symbol} at {minute} dropped")]
pub struct FlushQueueClosed {
    /// Symbol of the dropped bucket.
    pub symbol: String,
    /// Window of the dropped bucket.
    pub minute: MinuteWindow,
}

/// Ordered, non-blocking hand-off of finalized buckets.
///
/// Implementations must preserve enqueue order and must not block: the
/// aggregator calls this inside its critical section.
pub trait FlushQueue: Send + Sync {
    /// Enqueue a bucket for persistence.
    ///
    /// # Errors
    ///
    /// Returns [`FlushQueueClosed`] if the consumer side has shut down.
    fn enqueue(&self, bucket: FinalizedBucket) -> Result<(), FlushQueueClosed>;
}

impl FlushQueue for mpsc::UnboundedSender<FinalizedBucket> {
    fn enqueue(&self, bucket: FinalizedBucket) -> Result<(), FlushQueueClosed> {
        self.send(bucket).map_err(|mpsc::error::SendError(b)| FlushQueueClosed {
            symbol: b.symbol,
            minute: b.minute,
        })
    }
}

// =============================================================================
// CVD Store
// =============================================================================

/// Summed CVD for one symbol over a query window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolCvd {
    /// Instrument identifier.
    pub symbol: String,
    /// Sum of persisted bucket values.
    pub value: Decimal,
}

/// Errors raised by store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Opening or connecting to the database failed.
    #[error("database connection error: {0}")]
    Connection(String),

    /// A statement failed to execute.
    #[error("query error: {0}")]
    Query(String),

    /// A row did not have the expected shape.
    #[error("unexpected row format: {0}")]
    RowFormat(String),

    /// A numeric value could not be represented.
    #[error("value conversion error: {0}")]
    Conversion(String),
}

/// Durable storage for finalized buckets.
///
/// `persist` is called at most once per (symbol, minute) by the pipeline,
/// but adapters must still treat a repeated call as an overwrite so a
/// replay never double counts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CvdStore: Send + Sync {
    /// Durably store one bucket (upsert by symbol and minute).
    async fn persist(&self, bucket: &FinalizedBucket) -> Result<(), StoreError>;

    /// Sum of bucket values for `symbol` with `minute >= since_ms`.
    ///
    /// Returns `None` when no bucket falls in range.
    async fn sum_for_symbol(&self, symbol: &str, since_ms: i64)
    -> Result<Option<Decimal>, StoreError>;

    /// Symbols ranked by absolute summed value over `minute >= since_ms`.
    async fn top_symbols(&self, since_ms: i64, limit: usize) -> Result<Vec<SymbolCvd>, StoreError>;

    /// Most recent buckets for a symbol, newest first.
    async fn recent_buckets(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<FinalizedBucket>, StoreError>;

    /// Oldest persisted window across all symbols.
    async fn earliest_minute(&self) -> Result<Option<MinuteWindow>, StoreError>;
}
