//! Binance Futures Wire Types
//!
//! Deserialization targets for the USDⓈ-M futures combined stream and the
//! `exchangeInfo` REST endpoint.
//!
//! # References
//!
//! - [Aggregate Trade Streams](https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Aggregate-Trade-Streams)
//! - [Exchange Information](https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Exchange-Information)

use serde::Deserialize;

// =============================================================================
// Stream Messages
// =============================================================================

/// Combined stream envelope.
///
/// # Wire Format (JSON)
/// ```json
/// {"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","s":"BTCUSDT",...}}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    /// Stream name, e.g. `btcusdt@aggTrade`.
    pub stream: String,
    /// Event payload. Kept raw so non-trade events are rejected by the codec
    /// instead of failing deserialization of the envelope.
    pub data: serde_json::Value,
}

/// Aggregate trade payload.
///
/// # Wire Format (JSON)
/// ```json
/// {"e":"aggTrade","E":1704067200100,"s":"BTCUSDT","a":5933014,
///  "p":"42000.10","q":"0.012","f":100,"l":105,"T":1704067200095,"m":true}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeData {
    /// Event type, always `aggTrade`.
    #[serde(rename = "e")]
    pub event_type: String,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Price as a decimal string.
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity as a decimal string.
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time in epoch milliseconds.
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Buyer is the market maker (the aggressor sold).
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

// =============================================================================
// REST Messages
// =============================================================================

/// `GET /fapi/v1/exchangeInfo` response (fields used here only).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    /// Listed instruments.
    pub symbols: Vec<SymbolInfo>,
}

/// One listed instrument.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    /// Symbol name.
    pub symbol: String,
    /// Trading status, `TRADING` when live.
    pub status: String,
    /// Quote asset, e.g. `USDT`.
    pub quote_asset: String,
}

impl SymbolInfo {
    /// Whether the instrument is live and quoted in `quote_asset`.
    #[must_use]
    pub fn is_trading_in(&self, quote_asset: &str) -> bool {
        self.status == "TRADING" && self.quote_asset.eq_ignore_ascii_case(quote_asset)
    }
}
