#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! CVD Aggregator - Minute-Bucketed Cumulative Volume Delta
//!
//! Ingests Binance USDⓈ-M futures aggregate trades, keeps a running signed
//! notional per symbol, and persists exactly one bucket per symbol and
//! minute. Persisted buckets answer "CVD over the last N minutes" queries.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: minute windows, trades, per-symbol window state
//! - **Application**: the aggregator, query and command services, ports
//! - **Infrastructure**: Binance streams, Turso store, HTTP surfaces,
//!   configuration, metrics and tracing
//!
//! # Data Flow
//!
//! ```text
//! aggTrade WS (shard 0) ──┐
//! aggTrade WS (shard 1) ──┼─► mpsc ─► MinuteAggregator ─► flush queue ─► FlushWriter ─► Turso
//! aggTrade WS (shard N) ──┘                 ▲                                            │
//!                                      sweep timer                       QueryService ◄──┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Window arithmetic and per-symbol state.
pub mod domain;

/// Application layer - Aggregation, queries and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cvd::{
    Direction, FinalizedBucket, MINUTE_MS, MinuteWindow, TradeEvent, WindowTransition,
};

// Application services and ports
pub use application::ports::{CvdStore, FlushQueue, StoreError, SymbolCvd};
pub use application::services::{
    AggregatorStats, Command, CommandDefaults, MinuteAggregator, QueryError, QueryService,
    SymbolSnapshot, SymbolSum, TopCvd,
};

// Infrastructure config
pub use infrastructure::config::{AggregatorConfig, ConfigError};

// Storage
pub use infrastructure::storage::{FlushWriter, TursoCvdStore, WriterStats};

// HTTP surfaces
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::http::{ApiServer, ApiState, HttpServerError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
