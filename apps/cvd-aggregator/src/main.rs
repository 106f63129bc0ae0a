//! CVD Aggregator Binary
//!
//! Streams Binance futures trades into per-minute CVD buckets and serves
//! summaries over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin cvd-aggregator
//! ```
//!
//! # Environment Variables
//!
//! - `CVD_DATABASE_PATH`: Database file (default: cvd.db)
//! - `CVD_SYMBOLS`: Comma-separated symbols; skips discovery when set
//! - `CVD_QUOTE_ASSET`: Quote asset for discovery (default: USDT)
//! - `CVD_API_PORT`: Query API port (default: 8080)
//! - `CVD_HEALTH_PORT`: Health check port (default: 8082)
//! - `CVD_SWEEP_INTERVAL_SECS` / `CVD_SWEEP_GRACE_SECS`: Idle window closing
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cvd_aggregator::application::services::{CommandDefaults, MinuteAggregator, QueryService};
use cvd_aggregator::infrastructure::backoff::BackoffConfig;
use cvd_aggregator::infrastructure::binance::{
    FeedStates, StreamClient, StreamClientConfig, StreamEvent, SymbolDiscovery, chunk_symbols,
    stream_url,
};
use cvd_aggregator::infrastructure::health::{HealthServer, HealthServerState};
use cvd_aggregator::infrastructure::http::{ApiServer, ApiState, system_clock};
use cvd_aggregator::infrastructure::pipeline::{consume_stream_events, run_sweeper};
use cvd_aggregator::infrastructure::storage::{FlushWriter, TursoCvdStore};
use cvd_aggregator::infrastructure::telemetry;
use cvd_aggregator::{AggregatorConfig, CvdStore, init_metrics};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting CVD aggregator");

    let _metrics_handle = init_metrics();

    let config = AggregatorConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Persistence
    let store: Arc<dyn CvdStore> = Arc::new(
        TursoCvdStore::open(&config.database_path)
            .await
            .context("opening bucket store")?,
    );
    let (flush_tx, flush_rx) = mpsc::unbounded_channel();
    let writer_stop = CancellationToken::new();
    let writer = FlushWriter::new(
        Arc::clone(&store),
        flush_rx,
        config.pipeline.persist_attempts,
    );
    let writer_handle = tokio::spawn(writer.run(writer_stop.clone()));

    // Aggregation
    let aggregator = Arc::new(
        MinuteAggregator::new(Arc::new(flush_tx)).with_sweep_grace(config.pipeline.sweep_grace),
    );

    // Symbols and shards
    let symbols = resolve_symbols(&config).await?;
    let shards = chunk_symbols(&symbols, config.venue.max_streams_per_connection);
    let shard_sizes: Vec<usize> = shards.iter().map(Vec::len).collect();
    let feeds = FeedStates::new(&shard_sizes);
    tracing::info!(
        symbols = symbols.len(),
        shards = shards.len(),
        "Subscribing to aggregate trade streams"
    );

    let (event_tx, event_rx) = mpsc::channel::<StreamEvent>(config.pipeline.trade_channel_capacity);
    let consumer_handle = tokio::spawn(consume_stream_events(
        event_rx,
        Arc::clone(&aggregator),
        feeds.clone(),
    ));

    let stream_base = config.stream_base_url();
    let mut client_handles = Vec::with_capacity(shards.len());
    for (index, group) in shards.iter().enumerate() {
        let client = Arc::new(StreamClient::new(
            StreamClientConfig {
                shard: index,
                url: stream_url(&stream_base, group),
                reconnect: BackoffConfig::from_websocket_settings(&config.websocket),
                idle_timeout: config.websocket.idle_timeout,
            },
            event_tx.clone(),
            shutdown_token.clone(),
        ));
        client_handles.push(tokio::spawn(async move {
            if let Err(e) = client.run().await {
                tracing::error!(shard = index, error = %e, "Stream client error");
            }
        }));
    }
    drop(event_tx);

    let sweeper_handle = tokio::spawn(run_sweeper(
        Arc::clone(&aggregator),
        config.pipeline.sweep_interval,
        system_clock,
        shutdown_token.clone(),
    ));

    // HTTP surfaces
    let defaults = CommandDefaults {
        top_minutes: config.query.default_top_minutes,
        top_limit: config.query.top_limit,
    };
    let api_state = ApiState::new(
        QueryService::new(Arc::clone(&store), config.venue.quote_asset.clone()),
        Arc::clone(&aggregator),
        defaults,
    );
    let api_server = ApiServer::new(config.server.api_port, api_state, shutdown_token.clone());
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "Query API error");
        }
    });

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feeds,
        Arc::clone(&aggregator),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("CVD aggregator ready");

    await_shutdown(shutdown_token).await;

    // Stop ingest first so every in-flight trade is applied before draining.
    join_all("stream clients", client_handles).await;
    join_one("stream event consumer", consumer_handle).await;
    join_one("sweeper", sweeper_handle).await;

    let drained = aggregator.drain();
    tracing::info!(buckets = drained, "Open windows drained");

    writer_stop.cancel();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, writer_handle).await {
        Ok(Ok(stats)) => tracing::info!(
            persisted = stats.persisted,
            failed = stats.failed,
            "Flush queue drained"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Flush writer panicked"),
        Err(_) => tracing::error!("Flush writer did not finish before shutdown timeout"),
    }

    join_all("HTTP servers", vec![api_handle, health_handle]).await;

    let stats = aggregator.stats();
    tracing::info!(
        trades = stats.trades_processed,
        buckets = stats.buckets_flushed,
        late = stats.late_events_dropped,
        lost = stats.buckets_lost,
        "CVD aggregator stopped"
    );
    Ok(())
}

/// Explicit symbol list, or discovery when none is configured.
async fn resolve_symbols(config: &AggregatorConfig) -> anyhow::Result<Vec<String>> {
    if let Some(symbols) = &config.venue.symbols {
        tracing::info!(count = symbols.len(), "Using configured symbols");
        return Ok(symbols.clone());
    }

    let discovery = SymbolDiscovery::new(config.exchange_info_url())?;
    let symbols = discovery
        .trading_symbols(&config.venue.quote_asset)
        .await
        .context("discovering trading symbols")?;
    Ok(symbols)
}

async fn join_one<T>(name: &str, handle: JoinHandle<T>) {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(_)) => tracing::debug!(task = name, "Task stopped"),
        Ok(Err(e)) => tracing::error!(task = name, error = %e, "Task panicked"),
        Err(_) => tracing::warn!(task = name, "Task did not stop before shutdown timeout"),
    }
}

async fn join_all(name: &str, handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        join_one(name, handle).await;
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AggregatorConfig) {
    tracing::info!(
        database = %config.database_path,
        quote_asset = %config.venue.quote_asset,
        api_port = config.server.api_port,
        health_port = config.server.health_port,
        sweep_interval_secs = config.pipeline.sweep_interval.as_secs(),
        sweep_grace_secs = config.pipeline.sweep_grace.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        rest = %config.exchange_info_url(),
        stream = %config.stream_base_url(),
        "Venue endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
