//! Bucket Persistence
//!
//! - [`TursoCvdStore`]: the [`CvdStore`](crate::application::ports::CvdStore)
//!   adapter
//! - [`FlushWriter`]: drains the aggregator's flush queue into a store

mod turso_store;
mod writer;

pub use turso_store::TursoCvdStore;
pub use writer::{FlushWriter, WriterStats};
