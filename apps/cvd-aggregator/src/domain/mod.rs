//! Domain Layer - Core CVD types and window logic.
//!
//! Pure Rust with no I/O. Everything the aggregator decides about a trade
//! (which minute it belongs to, whether it opens, extends or closes a
//! window, whether it is late) lives here.

/// Trades, minute windows and per-symbol window state.
pub mod cvd;
