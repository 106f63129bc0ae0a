//! Stream Codec Module
//!
//! Decodes combined-stream text frames into validated [`TradeEvent`]s.
//! Anything that is not a well-formed aggregate trade with positive price
//! and quantity, a representable notional and a non-negative trade time is
//! rejected here and never reaches the aggregator.

use std::str::FromStr;

use rust_decimal::Decimal;

use super::messages::{AggTradeData, StreamEnvelope};
use crate::domain::cvd::{Direction, MINUTE_MS, TradeEvent};

/// Latest accepted trade time; the window containing it still has an end.
pub const MAX_TRADE_TIME_MS: i64 = i64::MAX - MINUTE_MS;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is not an aggregate trade.
    #[error("unexpected event type: {0}")]
    UnexpectedEvent(String),

    /// A numeric field could not be parsed.
    #[error("invalid {field}: {value:?}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },

    /// A numeric field parsed but is zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositive {
        /// Field name.
        field: &'static str,
        /// Parsed value.
        value: Decimal,
    },

    /// `price * quantity` does not fit in a `Decimal`.
    #[error("notional overflows: price {price} x quantity {quantity}")]
    NotionalOverflow {
        /// Parsed price.
        price: Decimal,
        /// Parsed quantity.
        quantity: Decimal,
    },

    /// Trade time is negative or too close to `i64::MAX`.
    #[error("trade time {0} out of range")]
    TimestampOutOfRange(i64),

    /// Symbol is empty.
    #[error("empty symbol")]
    EmptySymbol,
}

/// JSON codec for `<symbol>@aggTrade` combined streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct AggTradeCodec;

impl AggTradeCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame into a trade event.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON, is not an aggregate
    /// trade, or carries an unparsable or non-positive price or quantity.
    pub fn decode(&self, text: &str) -> Result<TradeEvent, CodecError> {
        let envelope: StreamEnvelope = serde_json::from_str(text)?;

        let event_type = envelope
            .data
            .get("e")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if event_type != "aggTrade" {
            return Err(CodecError::UnexpectedEvent(if event_type.is_empty() {
                envelope.stream
            } else {
                event_type.to_string()
            }));
        }

        let data: AggTradeData = serde_json::from_value(envelope.data)?;
        self.to_trade(data)
    }

    /// Validate a decoded payload and convert it to a domain event.
    ///
    /// # Errors
    ///
    /// Returns an error on an empty symbol, a bad numeric field, a notional
    /// outside the `Decimal` range or a trade time outside
    /// `0..=MAX_TRADE_TIME_MS`.
    pub fn to_trade(&self, data: AggTradeData) -> Result<TradeEvent, CodecError> {
        if data.symbol.trim().is_empty() {
            return Err(CodecError::EmptySymbol);
        }
        if !(0..=MAX_TRADE_TIME_MS).contains(&data.trade_time) {
            return Err(CodecError::TimestampOutOfRange(data.trade_time));
        }
        let price = parse_positive("price", &data.price)?;
        let quantity = parse_positive("quantity", &data.quantity)?;
        if price.checked_mul(quantity).is_none() {
            return Err(CodecError::NotionalOverflow { price, quantity });
        }

        Ok(TradeEvent::new(
            data.symbol,
            quantity,
            price,
            Direction::from_buyer_is_maker(data.buyer_is_maker),
            data.trade_time,
        ))
    }
}

fn parse_positive(field: &'static str, raw: &str) -> Result<Decimal, CodecError> {
    let value = Decimal::from_str(raw.trim()).map_err(|_| CodecError::InvalidNumber {
        field,
        value: raw.to_string(),
    })?;
    if value <= Decimal::ZERO {
        return Err(CodecError::NonPositive { field, value });
    }
    Ok(value)
}
