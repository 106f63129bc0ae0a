//! Cumulative Volume Delta Types
//!
//! Canonical internal representation of the CVD pipeline:
//!
//! - [`TradeEvent`]: one aggressor-signed trade print
//! - [`MinuteWindow`]: a half-open one-minute interval keyed by its start
//! - [`SymbolState`]: running total and open window for one instrument
//! - [`FinalizedBucket`]: a closed window handed to persistence

mod state;
mod trade;
mod window;

pub use state::{FinalizedBucket, OpenWindow, SymbolState, WindowTransition};
pub use trade::{Direction, TradeEvent};
pub use window::{MINUTE_MS, MinuteWindow};
