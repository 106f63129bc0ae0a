//! Aggregator Configuration Settings
//!
//! Configuration types for the CVD aggregator, loaded from environment
//! variables. Absent or unparsable values fall back to defaults; values that
//! parse but cannot work (zero capacities, empty URLs) are errors.

use std::time::Duration;

/// Venue endpoints and symbol selection.
#[derive(Debug, Clone)]
pub struct VenueSettings {
    /// REST base URL used for symbol discovery.
    pub rest_url: String,
    /// WebSocket base URL for combined streams.
    pub ws_url: String,
    /// Quote asset used to filter discovered symbols and normalize tickers.
    pub quote_asset: String,
    /// Explicit symbol list. When set, discovery is skipped.
    pub symbols: Option<Vec<String>>,
    /// Maximum number of symbol streams multiplexed on one connection.
    pub max_streams_per_connection: usize,
}

impl Default for VenueSettings {
    fn default() -> Self {
        Self {
            rest_url: "https://fapi.binance.com".to_string(),
            ws_url: "wss://fstream.binance.com".to_string(),
            quote_asset: "USDT".to_string(),
            symbols: None,
            max_streams_per_connection: 150,
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Reconnect when no frame arrives for this long.
    pub idle_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

/// Aggregation pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Capacity of the bounded trade channel between stream clients and
    /// the aggregator.
    pub trade_channel_capacity: usize,
    /// How often open windows are checked for forced closing.
    pub sweep_interval: Duration,
    /// Delay after a minute ends before the sweep closes it.
    pub sweep_grace: Duration,
    /// Attempts per bucket before a persistence failure is final.
    pub persist_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            trade_channel_capacity: 65_536,
            sweep_interval: Duration::from_secs(5),
            sweep_grace: Duration::from_secs(5),
            persist_attempts: 3,
        }
    }
}

/// Query surface settings.
#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    /// Number of symbols returned by the top query.
    pub top_limit: usize,
    /// Look-back used by the top command when none is given.
    pub default_top_minutes: u32,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            top_limit: 20,
            default_top_minutes: 10,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Query API HTTP port.
    pub api_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete aggregator configuration.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Path of the SQLite-compatible database file.
    pub database_path: String,
    /// Venue settings.
    pub venue: VenueSettings,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Pipeline settings.
    pub pipeline: PipelineSettings,
    /// Query settings.
    pub query: QuerySettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            database_path: "cvd.db".to_string(),
            venue: VenueSettings::default(),
            websocket: WebSocketSettings::default(),
            pipeline: PipelineSettings::default(),
            query: QuerySettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl AggregatorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let defaults = Self::default();

        let database_path = env.string("CVD_DATABASE_PATH", &defaults.database_path);
        if database_path.trim().is_empty() {
            return Err(ConfigError::EmptyValue("CVD_DATABASE_PATH".to_string()));
        }

        let venue = VenueSettings {
            rest_url: env.string("BINANCE_REST_URL", &defaults.venue.rest_url),
            ws_url: env.string("BINANCE_WS_URL", &defaults.venue.ws_url),
            quote_asset: env
                .string("CVD_QUOTE_ASSET", &defaults.venue.quote_asset)
                .to_uppercase(),
            symbols: env.list("CVD_SYMBOLS"),
            max_streams_per_connection: env.parse(
                "CVD_MAX_STREAMS_PER_CONNECTION",
                defaults.venue.max_streams_per_connection,
            ),
        };

        let websocket = WebSocketSettings {
            idle_timeout: env.secs("CVD_IDLE_TIMEOUT_SECS", defaults.websocket.idle_timeout),
            reconnect_delay_initial: env.millis(
                "CVD_RECONNECT_DELAY_INITIAL_MS",
                defaults.websocket.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "CVD_RECONNECT_DELAY_MAX_SECS",
                defaults.websocket.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "CVD_RECONNECT_DELAY_MULTIPLIER",
                defaults.websocket.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "CVD_MAX_RECONNECT_ATTEMPTS",
                defaults.websocket.max_reconnect_attempts,
            ),
        };

        let pipeline = PipelineSettings {
            trade_channel_capacity: env.parse(
                "CVD_TRADE_CHANNEL_CAPACITY",
                defaults.pipeline.trade_channel_capacity,
            ),
            sweep_interval: env.secs("CVD_SWEEP_INTERVAL_SECS", defaults.pipeline.sweep_interval),
            sweep_grace: env.secs("CVD_SWEEP_GRACE_SECS", defaults.pipeline.sweep_grace),
            persist_attempts: env.parse("CVD_PERSIST_ATTEMPTS", defaults.pipeline.persist_attempts),
        };

        let query = QuerySettings {
            top_limit: env.parse("CVD_TOP_LIMIT", defaults.query.top_limit),
            default_top_minutes: env.parse(
                "CVD_DEFAULT_TOP_MINUTES",
                defaults.query.default_top_minutes,
            ),
        };

        let server = ServerSettings {
            api_port: env.parse("CVD_API_PORT", defaults.server.api_port),
            health_port: env.parse("CVD_HEALTH_PORT", defaults.server.health_port),
        };

        let config = Self {
            database_path,
            venue,
            websocket,
            pipeline,
            query,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            (
                "CVD_MAX_STREAMS_PER_CONNECTION",
                self.venue.max_streams_per_connection == 0,
            ),
            (
                "CVD_TRADE_CHANNEL_CAPACITY",
                self.pipeline.trade_channel_capacity == 0,
            ),
            ("CVD_SWEEP_INTERVAL_SECS", self.pipeline.sweep_interval.is_zero()),
            ("CVD_PERSIST_ATTEMPTS", self.pipeline.persist_attempts == 0),
            ("CVD_TOP_LIMIT", self.query.top_limit == 0),
            ("CVD_DEFAULT_TOP_MINUTES", self.query.default_top_minutes == 0),
        ];
        if let Some((key, _)) = zero_checks.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::InvalidValue {
                key: (*key).to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.venue.ws_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("BINANCE_WS_URL".to_string()));
        }
        if self.venue.quote_asset.trim().is_empty() {
            return Err(ConfigError::EmptyValue("CVD_QUOTE_ASSET".to_string()));
        }
        if matches!(&self.venue.symbols, Some(list) if list.is_empty()) {
            return Err(ConfigError::EmptyValue("CVD_SYMBOLS".to_string()));
        }
        Ok(())
    }

    /// Combined-stream base URL, e.g. `wss://fstream.binance.com/stream`.
    #[must_use]
    pub fn stream_base_url(&self) -> String {
        format!("{}/stream", self.venue.ws_url.trim_end_matches('/'))
    }

    /// Exchange info URL used for symbol discovery.
    #[must_use]
    pub fn exchange_info_url(&self) -> String {
        format!(
            "{}/fapi/v1/exchangeInfo",
            self.venue.rest_url.trim_end_matches('/')
        )
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds a value that cannot work.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        (self.lookup)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        (self.lookup)(key).map(|v| {
            v.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AggregatorConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AggregatorConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_path, "cvd.db");
        assert_eq!(config.venue.max_streams_per_connection, 150);
        assert_eq!(config.venue.quote_asset, "USDT");
        assert!(config.venue.symbols.is_none());
        assert_eq!(config.pipeline.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.query.top_limit, 20);
        assert_eq!(config.server.api_port, 8080);
        assert_eq!(config.server.health_port, 8082);
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("CVD_DATABASE_PATH", "/tmp/x.db"),
            ("CVD_SYMBOLS", "btcusdt, ethusdt,,"),
            ("CVD_SWEEP_GRACE_SECS", "2"),
            ("CVD_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("CVD_QUOTE_ASSET", "usdc"),
        ])
        .unwrap();
        assert_eq!(config.database_path, "/tmp/x.db");
        assert_eq!(
            config.venue.symbols,
            Some(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()])
        );
        assert_eq!(config.pipeline.sweep_grace, Duration::from_secs(2));
        assert_eq!(
            config.websocket.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(config.venue.quote_asset, "USDC");
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = config_from(&[("CVD_API_PORT", "not-a-port")]).unwrap();
        assert_eq!(config.server.api_port, 8080);
    }

    #[test]
    fn zero_streams_per_connection_rejected() {
        let err = config_from(&[("CVD_MAX_STREAMS_PER_CONNECTION", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CVD_MAX_STREAMS_PER_CONNECTION"));
    }

    #[test]
    fn empty_symbol_list_rejected() {
        let err = config_from(&[("CVD_SYMBOLS", " , ")]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn urls_are_built_from_bases() {
        let config = config_from(&[("BINANCE_WS_URL", "wss://example.test/")]).unwrap();
        assert_eq!(config.stream_base_url(), "wss://example.test/stream");
        assert_eq!(
            config.exchange_info_url(),
            "https://fapi.binance.com/fapi/v1/exchangeInfo"
        );
    }
}
