//! Per-symbol window state machine.
//!
//! A symbol has at most one open window. A trade for a later minute closes
//! it and opens the next; a trade for an earlier minute (or for a minute
//! that was already closed) is late and never reopens anything.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::window::MinuteWindow;

/// A closed minute window ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedBucket {
    /// Instrument identifier.
    pub symbol: String,
    /// Window that was closed.
    pub minute: MinuteWindow,
    /// Signed notional accumulated in the window.
    pub value: Decimal,
}

/// The window currently accumulating for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpenWindow {
    /// Window start.
    pub window: MinuteWindow,
    /// Signed notional accumulated so far.
    pub value: Decimal,
}

/// Outcome of applying one trade to a [`SymbolState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowTransition {
    /// First window for the symbol (or first after a forced close).
    Opened(MinuteWindow),
    /// Trade landed in the open window.
    Accumulated(MinuteWindow),
    /// Trade belonged to a later minute; the previous window closed.
    Rolled {
        /// Bucket for the window that just closed.
        flushed: FinalizedBucket,
        /// Newly opened window.
        opened: MinuteWindow,
    },
    /// Trade belonged to a window that is already superseded or closed.
    Late {
        /// Window the trade would have belonged to.
        window: MinuteWindow,
        /// Most recent window the symbol has seen (open or closed).
        current: MinuteWindow,
    },
}

impl WindowTransition {
    /// The bucket this transition flushed, if any.
    #[must_use]
    pub const fn flushed(&self) -> Option<&FinalizedBucket> {
        match self {
            Self::Rolled { flushed, .. } => Some(flushed),
            _ => None,
        }
    }

    /// Whether the trade was dropped as late.
    #[must_use]
    pub const fn is_late(&self) -> bool {
        matches!(self, Self::Late { .. })
    }
}

/// Live state for one symbol.
///
/// `running_total` only ever grows by addition; it is never rebuilt from
/// persisted buckets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SymbolState {
    running_total: Decimal,
    open: Option<OpenWindow>,
    last_closed: Option<MinuteWindow>,
}

impl SymbolState {
    /// Cumulative signed notional since the process started.
    #[must_use]
    pub const fn running_total(&self) -> Decimal {
        self.running_total
    }

    /// The window currently accumulating.
    #[must_use]
    pub const fn open_window(&self) -> Option<OpenWindow> {
        self.open
    }

    /// The most recently flushed window.
    #[must_use]
    pub const fn last_closed(&self) -> Option<MinuteWindow> {
        self.last_closed
    }

    /// Apply one trade's signed notional at the given window.
    pub fn apply(
        &mut self,
        symbol: &str,
        window: MinuteWindow,
        notional: Decimal,
    ) -> WindowTransition {
        self.running_total = self.running_total.saturating_add(notional);

        match self.open {
            Some(ref mut open) if window == open.window => {
                open.value = open.value.saturating_add(notional);
                WindowTransition::Accumulated(window)
            }
            Some(open) if window > open.window => {
                self.last_closed = Some(open.window);
                self.open = Some(OpenWindow {
                    window,
                    value: notional,
                });
                WindowTransition::Rolled {
                    flushed: FinalizedBucket {
                        symbol: symbol.to_string(),
                        minute: open.window,
                        value: open.value,
                    },
                    opened: window,
                }
            }
            Some(open) => WindowTransition::Late {
                window,
                current: open.window,
            },
            None => match self.last_closed {
                Some(closed) if window <= closed => WindowTransition::Late {
                    window,
                    current: closed,
                },
                _ => {
                    self.open = Some(OpenWindow {
                        window,
                        value: notional,
                    });
                    WindowTransition::Opened(window)
                }
            },
        }
    }

    /// Close the open window if it ended at or before `cutoff_ms`.
    ///
    /// The window becomes `last_closed`, so later trades for it are late.
    pub fn close_if_ended(&mut self, symbol: &str, cutoff_ms: i64) -> Option<FinalizedBucket> {
        match self.open {
            Some(open) if open.window.end_ms() <= cutoff_ms => self.close(symbol),
            _ => None,
        }
    }

    /// Close the open window unconditionally.
    pub fn close(&mut self, symbol: &str) -> Option<FinalizedBucket> {
        let open = self.open.take()?;
        self.last_closed = Some(open.window);
        Some(FinalizedBucket {
            symbol: symbol.to_string(),
            minute: open.window,
            value: open.value,
        })
    }
}
