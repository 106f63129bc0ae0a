//! Flush Writer
//!
//! Drains the flush queue in order and persists each bucket, retrying a
//! bounded number of times. Runs outside the aggregator lock, so a slow or
//! failing store never stalls ingestion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::CvdStore;
use crate::domain::cvd::FinalizedBucket;
use crate::infrastructure::backoff::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::metrics;

/// Counts reported when the writer exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Buckets stored.
    pub persisted: u64,
    /// Buckets abandoned after the last attempt failed.
    pub failed: u64,
}

/// Consumer side of the flush queue.
pub struct FlushWriter {
    store: Arc<dyn CvdStore>,
    rx: mpsc::UnboundedReceiver<FinalizedBucket>,
    attempts: u32,
    retry: BackoffConfig,
}

impl FlushWriter {
    /// Create a writer making up to `attempts` tries per bucket.
    ///
    /// An `attempts` of 0 is treated as 1.
    #[must_use]
    pub fn new(
        store: Arc<dyn CvdStore>,
        rx: mpsc::UnboundedReceiver<FinalizedBucket>,
        attempts: u32,
    ) -> Self {
        Self {
            store,
            rx,
            attempts: attempts.max(1),
            // Delay schedule only; `attempts` bounds the tries.
            retry: BackoffConfig {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(2),
                multiplier: 2.0,
                jitter_factor: 0.1,
                max_attempts: 0,
            },
        }
    }

    /// Override the delays between attempts. The attempt budget is kept.
    #[must_use]
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.retry.initial_delay = initial;
        self.retry.max_delay = max;
        self
    }

    /// Persist buckets until the queue is empty and closed.
    ///
    /// Cancelling `stop` closes the queue to new buckets; everything already
    /// enqueued is still written before this returns.
    pub async fn run(mut self, stop: CancellationToken) -> WriterStats {
        let mut stats = WriterStats::default();
        let mut closing = false;

        loop {
            tokio::select! {
                biased;
                bucket = self.rx.recv() => {
                    let Some(bucket) = bucket else { break };
                    if self.persist_with_retry(&bucket).await {
                        stats.persisted += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
                () = stop.cancelled(), if !closing => {
                    tracing::debug!("Flush queue closing, draining remaining buckets");
                    self.rx.close();
                    closing = true;
                }
            }
        }

        tracing::info!(
            persisted = stats.persisted,
            failed = stats.failed,
            "Flush writer stopped"
        );
        stats
    }

    async fn persist_with_retry(&self, bucket: &FinalizedBucket) -> bool {
        let started = Instant::now();
        let mut policy = BackoffPolicy::new(self.retry.clone());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.store.persist(bucket).await {
                Ok(()) => {
                    tracing::debug!(
                        symbol = %bucket.symbol,
                        minute = %bucket.minute,
                        value = %bucket.value,
                        "Bucket persisted"
                    );
                    metrics::record_bucket_persisted(started.elapsed());
                    return true;
                }
                Err(e) if attempt >= self.attempts => {
                    tracing::error!(
                        symbol = %bucket.symbol,
                        minute = %bucket.minute,
                        value = %bucket.value,
                        attempts = attempt,
                        error = %e,
                        "Bucket lost after persist retries"
                    );
                    metrics::record_persist_failure();
                    return false;
                }
                Err(e) => {
                    let delay = policy.next_delay().unwrap_or(self.retry.max_delay);
                    tracing::warn!(
                        symbol = %bucket.symbol,
                        minute = %bucket.minute,
                        attempt,
                        error = %e,
                        "Persist failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl std::fmt::Debug for FlushWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushWriter")
            .field("attempts", &self.attempts)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
