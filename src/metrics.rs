//! Metrics hooks for the cache engine.
//!
//! The engine reports lookups, task settlements, background refreshes and
//! evictions to an optional user-provided sink.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use swr_memo::{SwrCache, SwrCacheBuilder};
//!
//! let sink = Arc::new(MyMetricsSink::new());
//! let cache: SwrCache<String, User, anyhow::Error> =
//!     SwrCacheBuilder::new().metrics(sink.clone()).build();
//! ```

use async_trait::async_trait;

/// Which path a lookup took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Joined a task that was already running.
    InFlight,
    /// Served a stored value inside its fresh window.
    Fresh,
    /// Served a stored value past its fresh window.
    Stale,
    /// Started a new task.
    Miss,
}

/// Why a key lost its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The dedupe window closed before the task settled.
    Dedupe,
    /// The stored value outlived its time to live.
    Ttl,
    /// `flush` or `flush_all` was called.
    Flush,
}

/// Metrics emitted by the cache engine.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheMetric {
    /// Emitted on every `get`.
    Lookup {
        outcome: LookupOutcome,
        /// Set when a stale hit started a background refresh.
        revalidation_started: bool,
    },
    /// Emitted when a task started by a miss settles.
    Settled {
        success: bool,
        /// Whether the result was kept as a stored value.
        stored: bool,
        /// Time from task start to settlement in milliseconds.
        latency_ms: f64,
    },
    /// Emitted when a background refresh settles.
    Revalidated {
        success: bool,
        /// Whether the refreshed value replaced the stale one.
        stored: bool,
        latency_ms: f64,
    },
    /// Emitted when a key is evicted.
    Evicted { reason: EvictionReason },
}

/// Trait for receiving cache metrics.
///
/// # Example
///
/// ```ignore
/// use std::sync::Mutex;
/// use async_trait::async_trait;
/// use swr_memo::{CacheMetric, MetricsSink};
///
/// struct BufferedSink {
///     buffer: Mutex<Vec<CacheMetric>>,
/// }
///
/// #[async_trait]
/// impl MetricsSink for BufferedSink {
///     fn emit(&self, metric: CacheMetric) {
///         self.buffer.lock().unwrap().push(metric);
///     }
///
///     async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Emit a single metric.
    ///
    /// Called synchronously on the lookup path, sometimes from timer tasks.
    /// Implementations should be fast (e.g., buffer metrics in memory).
    fn emit(&self, metric: CacheMetric);

    /// Flush any buffered metrics.
    ///
    /// Never called by the engine; owners call it at shutdown or periodically.
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
