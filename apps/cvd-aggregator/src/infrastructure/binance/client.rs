//! Aggregate Trade Stream Client
//!
//! Holds one combined-stream connection to Binance USDⓈ-M futures and
//! forwards decoded trades over a bounded channel.
//!
//! # Stream URL
//!
//! `wss://fstream.binance.com/stream?streams=btcusdt@aggTrade/ethusdt@aggTrade/...`
//!
//! # Protocol
//!
//! Text frames carry one JSON envelope each. The server pings every few
//! minutes and drops connections that do not answer; connections are also
//! closed by the server after 24 hours, so reconnects are routine.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::{AggTradeCodec, CodecError};
use crate::domain::cvd::TradeEvent;
use crate::infrastructure::backoff::{BackoffConfig, BackoffPolicy};
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur in the stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No frame arrived within the idle timeout.
    #[error("no frames for {0:?}")]
    IdleTimeout(Duration),

    /// Event receiver dropped.
    #[error("event channel closed")]
    ChannelSend,

    /// Maximum reconnection attempts exceeded.
    #[error("maximum reconnection attempts exceeded")]
    MaxReconnectAttemptsExceeded,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Stream Events
// =============================================================================

/// Events emitted by a stream client. Every event carries its shard index.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Connection established.
    Connected {
        /// Shard index.
        shard: usize,
    },
    /// Connection lost.
    Disconnected {
        /// Shard index.
        shard: usize,
        /// Why the connection ended.
        reason: String,
    },
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Shard index.
        shard: usize,
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// A validated trade.
    Trade {
        /// Shard index.
        shard: usize,
        /// Decoded trade.
        trade: TradeEvent,
    },
    /// Unrecoverable error; the client has stopped.
    Error {
        /// Shard index.
        shard: usize,
        /// Error description.
        message: String,
    },
}

impl StreamEvent {
    /// Shard that emitted the event.
    #[must_use]
    pub const fn shard(&self) -> usize {
        match self {
            Self::Connected { shard }
            | Self::Disconnected { shard, .. }
            | Self::Reconnecting { shard, .. }
            | Self::Trade { shard, .. }
            | Self::Error { shard, .. } => *shard,
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Configuration for one stream connection.
#[derive(Debug, Clone)]
pub struct StreamClientConfig {
    /// Shard index, used in events, logs and metrics.
    pub shard: usize,
    /// Full combined-stream URL.
    pub url: String,
    /// Reconnection backoff.
    pub reconnect: BackoffConfig,
    /// Reconnect when no frame arrives for this long.
    pub idle_timeout: Duration,
}

impl StreamClientConfig {
    /// Create a configuration with default backoff and a 60 second idle
    /// timeout.
    #[must_use]
    pub fn new(shard: usize, url: String) -> Self {
        Self {
            shard,
            url,
            reconnect: BackoffConfig::default(),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

// =============================================================================
// Stream Client
// =============================================================================

/// WebSocket client for one shard of aggregate trade streams.
pub struct StreamClient {
    config: StreamClientConfig,
    codec: AggTradeCodec,
    event_tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a new stream client.
    #[must_use]
    pub const fn new(
        config: StreamClientConfig,
        event_tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            codec: AggTradeCodec::new(),
            event_tx,
            cancel,
        }
    }

    /// Run the connection loop until cancelled or out of reconnect attempts.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::MaxReconnectAttemptsExceeded`] when the
    /// backoff budget is spent.
    pub async fn run(self: Arc<Self>) -> Result<(), StreamClientError> {
        let shard = self.config.shard;
        let mut policy = BackoffPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(shard, "Stream client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => {
                    tracing::info!(shard, "Stream client stopped");
                    return Ok(());
                }
                Err(StreamClientError::ChannelSend) => {
                    tracing::info!(shard, "Event receiver dropped, stopping stream client");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(shard, error = %e, "Stream connection error");
                    let delivered = self
                        .emit(StreamEvent::Disconnected {
                            shard,
                            reason: e.to_string(),
                        })
                        .await;
                    if !delivered {
                        return Ok(());
                    }

                    let Some(delay) = policy.next_delay() else {
                        self.emit(StreamEvent::Error {
                            shard,
                            message: StreamClientError::MaxReconnectAttemptsExceeded.to_string(),
                        })
                        .await;
                        return Err(StreamClientError::MaxReconnectAttemptsExceeded);
                    };

                    let attempt = policy.attempt_count();
                    tracing::info!(
                        shard,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to trade stream"
                    );
                    if !self.emit(StreamEvent::Reconnecting { shard, attempt }).await {
                        return Ok(());
                    }

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!(shard, "Stream client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect and pump frames until error or cancellation.
    async fn connect_and_run(&self, policy: &mut BackoffPolicy) -> Result<(), StreamClientError> {
        let shard = self.config.shard;
        tracing::info!(shard, url = %self.config.url, "Connecting to trade stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url).await?;
        let (mut write, mut read) = ws_stream.split();

        policy.reset();
        tracing::info!(shard, "Trade stream connected");
        self.send(StreamEvent::Connected { shard }).await?;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                frame = tokio::time::timeout(self.config.idle_timeout, read.next()) => {
                    let Ok(msg) = frame else {
                        return Err(StreamClientError::IdleTimeout(self.config.idle_timeout));
                    };
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(shard, ?frame, "Server sent close frame");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            // Pong and binary frames are not used by this stream
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!(shard, "WebSocket stream ended");
                            return Err(StreamClientError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Decode one text frame and forward the trade.
    async fn handle_text_message(&self, text: &str) -> Result<(), StreamClientError> {
        let shard = self.config.shard;
        match self.codec.decode(text) {
            Ok(trade) => self.send(StreamEvent::Trade { shard, trade }).await,
            Err(e) => {
                log_rejected(shard, &e);
                metrics::record_trade_rejected(rejection_reason(&e));
                Ok(())
            }
        }
    }

    async fn send(&self, event: StreamEvent) -> Result<(), StreamClientError> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| StreamClientError::ChannelSend)
    }

    /// Send a status event. Returns `false` once the receiver is gone.
    async fn emit(&self, event: StreamEvent) -> bool {
        match self.event_tx.send(event).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    shard = self.config.shard,
                    event = ?e.0,
                    "Event receiver dropped, status event discarded"
                );
                false
            }
        }
    }
}

fn log_rejected(shard: usize, error: &CodecError) {
    tracing::debug!(shard, error = %error, "Rejected stream frame");
}

/// Metric label for a codec rejection.
#[must_use]
pub const fn rejection_reason(error: &CodecError) -> &'static str {
    match error {
        CodecError::Json(_) => "malformed",
        CodecError::UnexpectedEvent(_) => "unexpected_event",
        CodecError::InvalidNumber { .. } => "invalid_number",
        CodecError::NonPositive { .. } => "non_positive",
        CodecError::NotionalOverflow { .. } => "notional_overflow",
        CodecError::TimestampOutOfRange(_) => "timestamp_out_of_range",
        CodecError::EmptySymbol => "empty_symbol",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = StreamClientConfig::new(2, "wss://example.test/stream".to_string());
        assert_eq!(config.shard, 2);
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.reconnect.max_attempts, 0);
    }

    #[test]
    fn events_report_shard() {
        let event = StreamEvent::Reconnecting {
            shard: 4,
            attempt: 1,
        };
        assert_eq!(event.shard(), 4);
    }

    #[test]
    fn rejection_reasons_are_stable() {
        assert_eq!(rejection_reason(&CodecError::EmptySymbol), "empty_symbol");
        assert_eq!(
            rejection_reason(&CodecError::TimestampOutOfRange(-1)),
            "timestamp_out_of_range"
        );
        assert_eq!(
            rejection_reason(&CodecError::UnexpectedEvent("x".to_string())),
            "unexpected_event"
        );
    }

    #[tokio::test]
    async fn handle_text_forwards_valid_trade() {
        let (tx, mut rx) = mpsc::channel(4);
        let client = StreamClient::new(
            StreamClientConfig::new(1, "wss://unused".to_string()),
            tx,
            CancellationToken::new(),
        );
        let frame = r#"{"stream":"ethusdt@aggTrade","data":{"e":"aggTrade","s":"ETHUSDT","p":"2000","q":"0.5","T":60000,"m":false}}"#;
        client.handle_text_message(frame).await.unwrap();
        client.handle_text_message("garbage").await.unwrap();

        match rx.try_recv().unwrap() {
            StreamEvent::Trade { shard, trade } => {
                assert_eq!(shard, 1);
                assert_eq!(trade.symbol, "ETHUSDT");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_reports_dropped_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let client = StreamClient::new(
            StreamClientConfig::new(3, "wss://unused".to_string()),
            tx,
            CancellationToken::new(),
        );
        assert!(client.emit(StreamEvent::Connected { shard: 3 }).await);

        drop(rx);
        let delivered = client
            .emit(StreamEvent::Reconnecting {
                shard: 3,
                attempt: 1,
            })
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn closed_receiver_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let client = StreamClient::new(
            StreamClientConfig::new(0, "wss://unused".to_string()),
            tx,
            CancellationToken::new(),
        );
        let frame = r#"{"stream":"x","data":{"e":"aggTrade","s":"BTCUSDT","p":"1","q":"1","T":1,"m":true}}"#;
        let err = client.handle_text_message(frame).await.unwrap_err();
        assert!(matches!(err, StreamClientError::ChannelSend));
    }
}
