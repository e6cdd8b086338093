//! swr-memo - in-process async memoization with stale-while-revalidate
//!
//! This library caches the result of an async task per key with:
//! - Coalescing of concurrent lookups into one in-flight task
//! - A dedupe window bounding how long one task is shared
//! - Stale-while-revalidate refresh in the background
//! - Time-to-live eviction
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use swr_memo::{CacheOptions, SwrCache};
//!
//! #[tokio::main]
//! async fn main() {
//!     let cache: SwrCache<String, String, anyhow::Error> = SwrCache::new();
//!     let options = CacheOptions::new(Duration::from_secs(5))
//!         .revalidate(Duration::from_secs(30))
//!         .ttl(Duration::from_secs(3600));
//!
//!     // Concurrent callers share one factory call; later callers within
//!     // 30 seconds get the stored value without calling it at all.
//!     let post = cache
//!         .get("post:1".to_string(), || async { Ok("Hello".to_string()) }, &options)
//!         .await
//!         .unwrap();
//! }
//! ```

mod builder;
mod clock;
mod entry;
mod error;
mod metrics;
mod namespace;
mod options;
mod swr;
mod utils;

// Re-export public API
pub use builder::SwrCacheBuilder;
pub use clock::{Clock, TokioClock};
pub use entry::EntryStatus;
pub use error::CacheError;
pub use metrics::{CacheMetric, EvictionReason, LookupOutcome, MetricsSink};
pub use namespace::Namespace;
pub use options::{CacheOptions, CachePolicy, DEFAULT_DEDUPE, TtlFn, Validator};
pub use swr::SwrCache;
