//! Builder API for creating cache engines.
//!
//! The builder injects the time source and an optional metrics sink; a
//! default-built engine uses [`TokioClock`] and emits no metrics.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use crate::clock::{Clock, TokioClock};
use crate::metrics::MetricsSink;
use crate::swr::SwrCache;

/// Builder for [`SwrCache`] instances.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use swr_memo::{SwrCache, SwrCacheBuilder, TokioClock};
///
/// let cache: SwrCache<String, Post, ApiError> = SwrCacheBuilder::new()
///     .clock(Arc::new(TokioClock))
///     .metrics(Arc::new(MyMetricsSink::new()))
///     .build();
/// ```
pub struct SwrCacheBuilder {
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl SwrCacheBuilder {
    /// Create a new SwrCacheBuilder.
    pub fn new() -> Self {
        SwrCacheBuilder {
            clock: Arc::new(TokioClock),
            metrics: None,
        }
    }

    /// Use `clock` for freshness deadlines and timers.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Report lookups, settlements and evictions to `sink`.
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Build the cache.
    pub fn build<K, V, E>(self) -> SwrCache<K, V, E>
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        tracing::debug!(clock = self.clock.name(), metrics = self.metrics.is_some(), "building cache");
        SwrCache::from_parts(self.clock, self.metrics)
    }
}

impl Default for SwrCacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}
