//! Configuration Module
//!
//! Environment-driven configuration for the aggregator service.

mod settings;

pub use settings::{
    AggregatorConfig, ConfigError, PipelineSettings, QuerySettings, ServerSettings,
    VenueSettings, WebSocketSettings,
};
