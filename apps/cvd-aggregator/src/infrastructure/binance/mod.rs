//! Binance Futures Adapter
//!
//! Trade source for the aggregator:
//!
//! - **Discovery**: live symbols from `exchangeInfo`, split into shards
//! - **Client**: one combined-stream WebSocket per shard
//! - **Codec**: validates `aggTrade` payloads into domain trades

pub mod client;
pub mod codec;
pub mod discovery;
pub mod feed;
pub mod messages;

pub use client::{StreamClient, StreamClientConfig, StreamClientError, StreamEvent};
pub use codec::{AggTradeCodec, CodecError};
pub use discovery::{DiscoveryError, SymbolDiscovery, chunk_symbols, stream_url};
pub use feed::{ConnectionState, FeedStates, ShardInfo, ShardState};
