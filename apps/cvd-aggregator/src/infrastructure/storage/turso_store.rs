//! Turso Bucket Store
//!
//! [`CvdStore`] over an embedded Turso (SQLite-compatible) database. One row
//! per (symbol, minute); writes replace, so replays never double count.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tokio::sync::Mutex;
use turso::{Builder, Connection, Row, Value};

use crate::application::ports::{CvdStore, StoreError, SymbolCvd};
use crate::domain::cvd::{FinalizedBucket, MinuteWindow};

/// Decimal places kept when reading REAL values back.
const READ_SCALE: u32 = 8;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS minute_cvd (
    symbol TEXT NOT NULL,
    minute_ts INTEGER NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (symbol, minute_ts)
)";

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_minute_cvd_minute_ts ON minute_cvd (minute_ts)";

const UPSERT: &str = "INSERT OR REPLACE INTO minute_cvd (symbol, minute_ts, value) VALUES (?1, ?2, ?3)";

const SUM_FOR_SYMBOL: &str =
    "SELECT SUM(value) FROM minute_cvd WHERE symbol = ?1 AND minute_ts >= ?2";

const TOP_SYMBOLS: &str = "SELECT symbol, SUM(value) FROM minute_cvd
    WHERE minute_ts >= ?1
    GROUP BY symbol
    ORDER BY ABS(SUM(value)) DESC, symbol ASC
    LIMIT ?2";

const RECENT_BUCKETS: &str = "SELECT minute_ts, value FROM minute_cvd
    WHERE symbol = ?1
    ORDER BY minute_ts DESC
    LIMIT ?2";

const EARLIEST_MINUTE: &str = "SELECT MIN(minute_ts) FROM minute_cvd";

/// Turso-backed store.
///
/// The connection is shared behind an async mutex; the flush writer is the
/// only writer and queries are short.
pub struct TursoCvdStore {
    conn: Mutex<Connection>,
}

impl TursoCvdStore {
    /// Open (or create) a database file and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the database cannot be opened,
    /// or [`StoreError::Query`] if schema creation fails.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("{path}: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate().await?;
        tracing::info!(path, "Bucket store opened");
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// See [`TursoCvdStore::open`].
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:").await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        for statement in [CREATE_TABLE, CREATE_INDEX] {
            conn.execute(statement, ())
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        }
        Ok(())
    }

    async fn query_rows(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>, StoreError> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?
        {
            out.push(row);
        }
        Ok(out)
    }
}

impl std::fmt::Debug for TursoCvdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TursoCvdStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl CvdStore for TursoCvdStore {
    async fn persist(&self, bucket: &FinalizedBucket) -> Result<(), StoreError> {
        let value = bucket.value.to_f64().ok_or_else(|| {
            StoreError::Conversion(format!("{} does not fit in REAL", bucket.value))
        })?;

        let conn = self.conn.lock().await;
        conn.execute(
            UPSERT,
            vec![
                Value::Text(bucket.symbol.clone()),
                Value::Integer(bucket.minute.start_ms()),
                Value::Real(value),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    async fn sum_for_symbol(
        &self,
        symbol: &str,
        since_ms: i64,
    ) -> Result<Option<Decimal>, StoreError> {
        let rows = self
            .query_rows(
                SUM_FOR_SYMBOL,
                vec![Value::Text(symbol.to_string()), Value::Integer(since_ms)],
            )
            .await?;

        match rows.first() {
            Some(row) => decimal_column(row, 0),
            None => Ok(None),
        }
    }

    async fn top_symbols(&self, since_ms: i64, limit: usize) -> Result<Vec<SymbolCvd>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .query_rows(
                TOP_SYMBOLS,
                vec![Value::Integer(since_ms), Value::Integer(limit)],
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(SymbolCvd {
                    symbol: text_column(row, 0)?,
                    value: decimal_column(row, 1)?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn recent_buckets(
        &self,
        symbol: &str,
        limit: usize,
    ) -> Result<Vec<FinalizedBucket>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .query_rows(
                RECENT_BUCKETS,
                vec![Value::Text(symbol.to_string()), Value::Integer(limit)],
            )
            .await?;

        rows.iter()
            .map(|row| {
                let minute = integer_column(row, 0)?
                    .ok_or_else(|| StoreError::RowFormat("minute_ts is NULL".to_string()))?;
                Ok(FinalizedBucket {
                    symbol: symbol.to_string(),
                    minute: MinuteWindow::containing(minute),
                    value: decimal_column(row, 1)?.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn earliest_minute(&self) -> Result<Option<MinuteWindow>, StoreError> {
        let rows = self.query_rows(EARLIEST_MINUTE, Vec::new()).await?;
        match rows.first() {
            Some(row) => Ok(integer_column(row, 0)?.map(MinuteWindow::containing)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Column Decoding
// =============================================================================

fn column(row: &Row, idx: usize) -> Result<Value, StoreError> {
    row.get_value(idx)
        .map_err(|e| StoreError::RowFormat(format!("column {idx}: {e}")))
}

fn text_column(row: &Row, idx: usize) -> Result<String, StoreError> {
    match column(row, idx)? {
        Value::Text(s) => Ok(s),
        other => Err(StoreError::RowFormat(format!(
            "column {idx}: expected TEXT, got {other:?}"
        ))),
    }
}

fn integer_column(row: &Row, idx: usize) -> Result<Option<i64>, StoreError> {
    match column(row, idx)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        other => Err(StoreError::RowFormat(format!(
            "column {idx}: expected INTEGER, got {other:?}"
        ))),
    }
}

fn decimal_column(row: &Row, idx: usize) -> Result<Option<Decimal>, StoreError> {
    match column(row, idx)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(Decimal::from(i))),
        Value::Real(f) => Decimal::from_f64(f)
            .map(|d| Some(d.round_dp(READ_SCALE).normalize()))
            .ok_or_else(|| StoreError::Conversion(format!("{f} is not a finite decimal"))),
        other => Err(StoreError::RowFormat(format!(
            "column {idx}: expected REAL, got {other:?}"
        ))),
    }
}
