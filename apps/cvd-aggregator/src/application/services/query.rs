//! CVD Query Service
//!
//! Answers summary questions from persisted buckets only. Never reads the
//! aggregator's in-memory state.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::application::ports::{CvdStore, StoreError, SymbolCvd};
use crate::domain::cvd::{FinalizedBucket, MINUTE_MS, MinuteWindow};

/// Upper bound on any query window (30 days).
pub const MAX_QUERY_MINUTES: u32 = 30 * 24 * 60;

/// Upper bound on ranked result size.
pub const MAX_TOP_LIMIT: usize = 500;

/// Query failures. Empty results are reported apart from store errors.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Nothing persisted in the requested range.
    #[error("no data for the requested period")]
    NoData,

    /// Caller supplied an out-of-range argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Summed CVD for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolSum {
    /// Normalized symbol.
    pub symbol: String,
    /// Requested look-back in minutes.
    pub minutes: u32,
    /// Sum of persisted bucket values in the window.
    pub value: Decimal,
}

/// Symbols ranked by absolute CVD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopCvd {
    /// Requested look-back in minutes.
    pub requested_minutes: u32,
    /// Look-back actually covered by stored history.
    pub minutes: u32,
    /// Ranked entries, largest absolute value first.
    pub entries: Vec<SymbolCvd>,
}

/// Read-side service over a [`CvdStore`].
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn CvdStore>,
    quote_asset: String,
}

impl QueryService {
    /// Create a query service. `quote_asset` is appended to bare tickers.
    #[must_use]
    pub fn new(store: Arc<dyn CvdStore>, quote_asset: impl Into<String>) -> Self {
        Self {
            store,
            quote_asset: quote_asset.into().to_uppercase(),
        }
    }

    /// Upper-case a ticker and append the quote asset when it is missing.
    #[must_use]
    pub fn normalize_symbol(&self, input: &str) -> String {
        let upper = input.trim().to_uppercase();
        if upper.ends_with(&self.quote_asset) {
            upper
        } else {
            format!("{upper}{}", self.quote_asset)
        }
    }

    /// Sum of persisted CVD for `symbol` over the last `minutes`.
    ///
    /// # Errors
    ///
    /// [`QueryError::NoData`] when nothing was persisted in range,
    /// [`QueryError::InvalidArgument`] for an empty symbol or bad window.
    pub async fn symbol_sum(
        &self,
        symbol: &str,
        minutes: u32,
        now_ms: i64,
    ) -> Result<SymbolSum, QueryError> {
        validate_minutes(minutes)?;
        if symbol.trim().is_empty() {
            return Err(QueryError::InvalidArgument("symbol is empty".to_string()));
        }

        let symbol = self.normalize_symbol(symbol);
        let since = since_ms(now_ms, minutes);

        let value = self
            .store
            .sum_for_symbol(&symbol, since)
            .await?
            .ok_or(QueryError::NoData)?;

        Ok(SymbolSum {
            symbol,
            minutes,
            value,
        })
    }

    /// Top `limit` symbols by absolute CVD over the last `minutes`.
    ///
    /// The reported window is clamped to the history actually stored.
    ///
    /// # Errors
    ///
    /// [`QueryError::NoData`] when the store is empty or nothing falls in
    /// range.
    pub async fn top(&self, minutes: u32, limit: usize, now_ms: i64) -> Result<TopCvd, QueryError> {
        validate_minutes(minutes)?;
        if limit == 0 || limit > MAX_TOP_LIMIT {
            return Err(QueryError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_TOP_LIMIT}"
            )));
        }

        let earliest = self.store.earliest_minute().await?.ok_or(QueryError::NoData)?;
        let covered = available_minutes(earliest, now_ms).clamp(1, minutes);

        let entries = self.store.top_symbols(since_ms(now_ms, covered), limit).await?;
        if entries.is_empty() {
            return Err(QueryError::NoData);
        }

        Ok(TopCvd {
            requested_minutes: minutes,
            minutes: covered,
            entries,
        })
    }

    /// Most recent persisted buckets for a symbol, newest first.
    ///
    /// # Errors
    ///
    /// [`QueryError::NoData`] when the symbol has no buckets.
    pub async fn recent(&self, symbol: &str, limit: usize) -> Result<Vec<FinalizedBucket>, QueryError> {
        if limit == 0 || limit > MAX_TOP_LIMIT {
            return Err(QueryError::InvalidArgument(format!(
                "limit must be between 1 and {MAX_TOP_LIMIT}"
            )));
        }

        let symbol = self.normalize_symbol(symbol);
        let buckets = self.store.recent_buckets(&symbol, limit).await?;
        if buckets.is_empty() {
            return Err(QueryError::NoData);
        }
        Ok(buckets)
    }
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("quote_asset", &self.quote_asset)
            .finish_non_exhaustive()
    }
}

fn validate_minutes(minutes: u32) -> Result<(), QueryError> {
    if minutes == 0 || minutes > MAX_QUERY_MINUTES {
        return Err(QueryError::InvalidArgument(format!(
            "minutes must be between 1 and {MAX_QUERY_MINUTES}"
        )));
    }
    Ok(())
}

fn since_ms(now_ms: i64, minutes: u32) -> i64 {
    now_ms - i64::from(minutes) * MINUTE_MS
}

/// Whole minutes between the oldest stored window and now.
fn available_minutes(earliest: MinuteWindow, now_ms: i64) -> u32 {
    let elapsed = (now_ms - earliest.start_ms()).max(0) / MINUTE_MS;
    u32::try_from(elapsed).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockCvdStore;
    use mockall::predicate::eq;
    use rust_decimal_macros::dec;

    const NOW: i64 = 1_704_067_200_000;

    fn service(store: MockCvdStore) -> QueryService {
        QueryService::new(Arc::new(store), "usdt")
    }

    #[test]
    fn normalize_appends_quote_asset() {
        let svc = service(MockCvdStore::new());
        assert_eq!(svc.normalize_symbol("btc"), "BTCUSDT");
        assert_eq!(svc.normalize_symbol(" ethusdt "), "ETHUSDT");
        assert_eq!(svc.normalize_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[tokio::test]
    async fn symbol_sum_uses_lookback_cutoff() {
        let mut store = MockCvdStore::new();
        store
            .expect_sum_for_symbol()
            .with(eq("BTCUSDT"), eq(NOW - 60 * MINUTE_MS))
            .times(1)
            .returning(|_, _| Ok(Some(dec!(-1234.5))));

        let sum = service(store).symbol_sum("btc", 60, NOW).await.unwrap();
        assert_eq!(sum.symbol, "BTCUSDT");
        assert_eq!(sum.value, dec!(-1234.5));
        assert_eq!(sum.minutes, 60);
    }

    #[tokio::test]
    async fn symbol_sum_empty_is_no_data() {
        let mut store = MockCvdStore::new();
        store.expect_sum_for_symbol().returning(|_, _| Ok(None));

        let err = service(store).symbol_sum("btc", 5, NOW).await.unwrap_err();
        assert!(matches!(err, QueryError::NoData));
    }

    #[tokio::test]
    async fn symbol_sum_store_failure_is_distinct() {
        let mut store = MockCvdStore::new();
        store
            .expect_sum_for_symbol()
            .returning(|_, _| Err(StoreError::Query("disk I/O".to_string())));

        let err = service(store).symbol_sum("btc", 5, NOW).await.unwrap_err();
        assert!(matches!(err, QueryError::Store(_)));
    }

    #[tokio::test]
    async fn symbol_sum_rejects_zero_minutes() {
        let err = service(MockCvdStore::new())
            .symbol_sum("btc", 0, NOW)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn top_clamps_to_available_history() {
        let mut store = MockCvdStore::new();
        store
            .expect_earliest_minute()
            .returning(|| Ok(Some(MinuteWindow::containing(NOW - 3 * MINUTE_MS))));
        store
            .expect_top_symbols()
            .with(eq(NOW - 3 * MINUTE_MS), eq(20))
            .returning(|_, _| {
                Ok(vec![SymbolCvd {
                    symbol: "BTCUSDT".to_string(),
                    value: dec!(500),
                }])
            });

        let top = service(store).top(10, 20, NOW).await.unwrap();
        assert_eq!(top.requested_minutes, 10);
        assert_eq!(top.minutes, 3);
        assert_eq!(top.entries.len(), 1);
    }

    #[tokio::test]
    async fn top_on_empty_store_is_no_data() {
        let mut store = MockCvdStore::new();
        store.expect_earliest_minute().returning(|| Ok(None));

        let err = service(store).top(10, 20, NOW).await.unwrap_err();
        assert!(matches!(err, QueryError::NoData));
    }

    #[tokio::test]
    async fn top_rejects_zero_limit() {
        let err = service(MockCvdStore::new()).top(10, 0, NOW).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn available_minutes_never_negative() {
        assert_eq!(available_minutes(MinuteWindow::containing(NOW + MINUTE_MS), NOW), 0);
        assert_eq!(available_minutes(MinuteWindow::containing(NOW - 90_000), NOW), 2);
    }
}
