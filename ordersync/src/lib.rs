//! Region order synchronization engine.
//!
//! `ordersync` continuously mirrors a partitioned, paginated market-data feed into a
//! local order store and publishes fine-grained change events to subscribers. Each
//! market region is synchronized by an independent long-lived worker which fetches
//! the region's order pages under a shared rate gate, diffs them against the
//! previously known state, applies serialized write batches, and detects orders
//! that silently disappeared from the feed.

pub mod cache;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod feed;
mod macros;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod reconcile;
pub mod resolve;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
pub mod write;
