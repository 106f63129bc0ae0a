//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process
//! plumbing (configuration, HTTP surfaces, observability).

/// Exponential backoff shared by reconnects and persistence retries.
pub mod backoff;

/// Binance futures trade stream adapter.
pub mod binance;

/// Turso-backed bucket store and the flush writer.
pub mod storage;

/// Configuration loading.
pub mod config;

/// Query API and command endpoint.
pub mod http;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// Stream event consumer and sweep timer.
pub mod pipeline;
