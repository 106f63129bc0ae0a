//! Query API
//!
//! # Endpoints
//!
//! - `GET /api/v1/cvd/{symbol}?minutes=N` - summed persisted CVD
//! - `GET /api/v1/cvd/{symbol}/buckets?limit=K` - recent persisted buckets
//! - `GET /api/v1/top?minutes=N&limit=K` - symbols ranked by absolute CVD
//! - `GET /api/v1/live/{symbol}` - in-memory state of one symbol
//! - `POST /api/v1/command` - chat-style command, plain text in and out

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    Command, CommandDefaults, MinuteAggregator, QueryError, QueryService,
};

/// Buckets returned by the history endpoint when no limit is given.
pub const DEFAULT_BUCKET_LIMIT: usize = 100;

// =============================================================================
// State
// =============================================================================

/// Wall clock in epoch milliseconds.
pub type Clock = fn() -> i64;

/// Current UTC time in epoch milliseconds.
#[must_use]
pub fn system_clock() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    queries: QueryService,
    aggregator: Arc<MinuteAggregator>,
    defaults: CommandDefaults,
    clock: Clock,
}

impl ApiState {
    /// Create API state using the system clock.
    #[must_use]
    pub fn new(
        queries: QueryService,
        aggregator: Arc<MinuteAggregator>,
        defaults: CommandDefaults,
    ) -> Self {
        Self {
            queries,
            aggregator,
            defaults,
            clock: system_clock,
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

// =============================================================================
// Server
// =============================================================================

/// Query API HTTP server.
pub struct ApiServer {
    port: u16,
    state: ApiState,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: ApiState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Build the router without binding.
    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/api/v1/cvd/{symbol}", get(symbol_cvd_handler))
            .route("/api/v1/cvd/{symbol}/buckets", get(buckets_handler))
            .route("/api/v1/top", get(top_handler))
            .route("/api/v1/live/{symbol}", get(live_handler))
            .route("/api/v1/command", post(command_handler))
            .with_state(state)
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = Self::router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Query API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Query API stopped");
        Ok(())
    }
}

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct MinutesParams {
    minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TopParams {
    minutes: Option<u32>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(QueryError);

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            QueryError::NoData => StatusCode::NOT_FOUND,
            QueryError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            QueryError::Store(e) => {
                tracing::error!(error = %e, "Query failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

async fn symbol_cvd_handler(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(params): Query<MinutesParams>,
) -> Result<impl IntoResponse, ApiError> {
    let minutes = params.minutes.unwrap_or(state.defaults.top_minutes);
    let sum = state
        .queries
        .symbol_sum(&symbol, minutes, (state.clock)())
        .await?;
    Ok(Json(sum))
}

async fn buckets_handler(
    State(state): State<ApiState>,
    Path(symbol): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_BUCKET_LIMIT);
    let buckets = state.queries.recent(&symbol, limit).await?;
    Ok(Json(buckets))
}

async fn top_handler(
    State(state): State<ApiState>,
    Query(params): Query<TopParams>,
) -> Result<impl IntoResponse, ApiError> {
    let minutes = params.minutes.unwrap_or(state.defaults.top_minutes);
    let limit = params.limit.unwrap_or(state.defaults.top_limit);
    let top = state.queries.top(minutes, limit, (state.clock)()).await?;
    Ok(Json(top))
}

async fn live_handler(State(state): State<ApiState>, Path(symbol): Path<String>) -> Response {
    let symbol = state.queries.normalize_symbol(&symbol);
    match state.aggregator.snapshot(&symbol) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: format!("{symbol} has no live state"),
            }),
        )
            .into_response(),
    }
}

async fn command_handler(State(state): State<ApiState>, body: String) -> impl IntoResponse {
    let command = Command::parse(&body, state.defaults);
    tracing::debug!(?command, "Command received");
    command
        .execute(&state.queries, state.defaults, (state.clock)())
        .await
}
