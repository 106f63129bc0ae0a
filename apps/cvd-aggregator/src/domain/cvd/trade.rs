//! Trade events as seen by the aggregator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::window::MinuteWindow;

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Aggressive buy (taker lifted the offer).
    Buy,
    /// Aggressive sell (taker hit the bid).
    Sell,
}

impl Direction {
    /// Signed unit: `+1` for buys, `-1` for sells.
    #[must_use]
    pub const fn sign(self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }

    /// Derive the aggressor from an exchange "buyer is maker" flag.
    ///
    /// When the buyer rested on the book the seller crossed the spread.
    #[must_use]
    pub const fn from_buyer_is_maker(buyer_is_maker: bool) -> Self {
        if buyer_is_maker { Self::Sell } else { Self::Buy }
    }
}

/// One trade print, already validated at the venue boundary.
///
/// Callers guarantee positive `quantity` and `price`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Venue-native instrument identifier, e.g. `BTCUSDT`.
    pub symbol: String,
    /// Trade size in base units.
    pub quantity: Decimal,
    /// Trade price in quote units.
    pub price: Decimal,
    /// Aggressor side.
    pub direction: Direction,
    /// Event time in UTC epoch milliseconds.
    pub timestamp_ms: i64,
}

impl TradeEvent {
    /// Create a new trade event.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        quantity: Decimal,
        price: Decimal,
        direction: Direction,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            price,
            direction,
            timestamp_ms,
        }
    }

    /// `direction * quantity * price`, saturating at the `Decimal` range.
    #[must_use]
    pub fn signed_notional(&self) -> Decimal {
        let notional = self.quantity.saturating_mul(self.price);
        match self.direction {
            Direction::Buy => notional,
            Direction::Sell => -notional,
        }
    }

    /// The minute window this trade falls into.
    #[must_use]
    pub const fn window(&self) -> MinuteWindow {
        MinuteWindow::containing(self.timestamp_ms)
    }
}
