//! Application Services
//!
//! - `aggregator`: the streaming minute-bucket aggregator
//! - `query`: summary queries over persisted buckets
//! - `command`: text command parsing and reply rendering

pub mod aggregator;
pub mod command;
pub mod query;

pub use aggregator::{AggregatorStats, MinuteAggregator, SymbolSnapshot};
pub use command::{Command, CommandDefaults, render_symbol_reply, render_top_reply};
pub use query::{QueryError, QueryService, SymbolSum, TopCvd};
