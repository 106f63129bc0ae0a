//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the aggregator and query services together with
//! the port interfaces that connect them to persistence.

/// Port interfaces for external systems (flush queue, store).
pub mod ports;

/// Application services: minute aggregation and summary queries.
pub mod services;
