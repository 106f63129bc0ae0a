//! Symbol Discovery
//!
//! Lists the live perpetual symbols to subscribe to and splits them into
//! connection-sized shards.

use std::time::Duration;

use super::messages::ExchangeInfo;

/// Request timeout for the exchange info call.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Discovery errors.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Network failure.
    #[error("network error: {0}")]
    Network(String),

    /// Non-success HTTP status.
    #[error("exchange info returned {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response body did not parse.
    #[error("failed to parse exchange info: {0}")]
    JsonParse(String),

    /// No symbol matched the filter.
    #[error("no trading symbols quoted in {0}")]
    NoSymbols(String),
}

/// REST client for `exchangeInfo`.
#[derive(Debug, Clone)]
pub struct SymbolDiscovery {
    client: reqwest::Client,
    url: String,
}

impl SymbolDiscovery {
    /// Create a discovery client for the given exchange info URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(DISCOVERY_TIMEOUT)
            .build()
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Fetch symbols with status `TRADING` quoted in `quote_asset`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error on network or parse failure, or if nothing matched.
    pub async fn trading_symbols(&self, quote_asset: &str) -> Result<Vec<String>, DiscoveryError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DiscoveryError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DiscoveryError::Api { status, body });
        }

        let info: ExchangeInfo = response
            .json()
            .await
            .map_err(|e| DiscoveryError::JsonParse(e.to_string()))?;

        let symbols = filter_symbols(&info, quote_asset);
        if symbols.is_empty() {
            return Err(DiscoveryError::NoSymbols(quote_asset.to_string()));
        }
        tracing::info!(count = symbols.len(), quote_asset, "Discovered trading symbols");
        Ok(symbols)
    }
}

/// Symbols from `info` that are trading and quoted in `quote_asset`.
#[must_use]
pub fn filter_symbols(info: &ExchangeInfo, quote_asset: &str) -> Vec<String> {
    let mut symbols: Vec<String> = info
        .symbols
        .iter()
        .filter(|s| s.is_trading_in(quote_asset))
        .map(|s| s.symbol.clone())
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Split `symbols` into groups of at most `size`.
///
/// A `size` of zero is treated as one.
#[must_use]
pub fn chunk_symbols(symbols: &[String], size: usize) -> Vec<Vec<String>> {
    symbols.chunks(size.max(1)).map(<[String]>::to_vec).collect()
}

/// Combined stream URL for one shard.
///
/// `base` is the `/stream` endpoint, e.g. `wss://fstream.binance.com/stream`.
#[must_use]
pub fn stream_url(base: &str, symbols: &[String]) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@aggTrade", s.to_lowercase()))
        .collect();
    format!("{base}?streams={}", streams.join("/"))
}
