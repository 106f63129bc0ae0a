//! Minute window arithmetic.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of one window in milliseconds.
pub const MINUTE_MS: i64 = 60_000;

/// A one-minute window `[start, start + 60s)` identified by its UTC start
/// in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MinuteWindow(i64);

impl MinuteWindow {
    /// The window containing the given event time.
    ///
    /// Floors toward negative infinity so pre-epoch timestamps still land
    /// on a minute boundary. Saturates at `i64::MIN`.
    #[must_use]
    pub const fn containing(timestamp_ms: i64) -> Self {
        Self(timestamp_ms.saturating_sub(timestamp_ms.rem_euclid(MINUTE_MS)))
    }

    /// Rebuild a window from a stored start timestamp.
    ///
    /// The value is re-floored, so a misaligned input still yields a valid
    /// window.
    #[must_use]
    pub const fn from_start_ms(start_ms: i64) -> Self {
        Self::containing(start_ms)
    }

    /// Window start in epoch milliseconds.
    #[must_use]
    pub const fn start_ms(self) -> i64 {
        self.0
    }

    /// Exclusive window end in epoch milliseconds, saturating at `i64::MAX`.
    #[must_use]
    pub const fn end_ms(self) -> i64 {
        self.0.saturating_add(MINUTE_MS)
    }

    /// The window immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.end_ms())
    }

    /// Window start as a UTC datetime.
    ///
    /// Returns `None` only for timestamps outside chrono's representable range.
    #[must_use]
    pub fn start_time(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for MinuteWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_time() {
            Some(t) => write!(f, "{}", t.format("%Y-%m-%dT%H:%MZ")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, 0 ; "epoch")]
    #[test_case(10_000, 0 ; "ten seconds in")]
    #[test_case(59_999, 0 ; "last millisecond")]
    #[test_case(60_000, 60_000 ; "exact boundary")]
    #[test_case(65_000, 60_000 ; "second minute")]
    #[test_case(-1, -60_000 ; "just before epoch")]
    fn containing_floors_to_minute(ts: i64, expected: i64) {
        assert_eq!(MinuteWindow::containing(ts).start_ms(), expected);
    }

    #[test]
    fn ordering_follows_time() {
        let a = MinuteWindow::containing(10_000);
        let b = MinuteWindow::containing(70_000);
        assert!(a < b);
        assert_eq!(a.next(), b);
        assert_eq!(a.end_ms(), b.start_ms());
    }

    #[test]
    fn display_is_minute_precision_utc() {
        // 2024-01-01T00:01:05Z
        let w = MinuteWindow::containing(1_704_067_265_000);
        assert_eq!(w.to_string(), "2024-01-01T00:01Z");
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        assert_eq!(MinuteWindow::containing(i64::MIN).start_ms(), i64::MIN);
        let last = MinuteWindow::containing(i64::MAX);
        assert!(last.start_ms() <= i64::MAX);
        assert_eq!(last.end_ms(), i64::MAX);
    }

    #[test]
    fn from_start_realigns() {
        assert_eq!(MinuteWindow::from_start_ms(61_234).start_ms(), 60_000);
    }
}
