//! Time source used by the cache engine.

use async_trait::async_trait;
use tokio::time::Instant;

/// A clock reads the current instant and suspends until a deadline.
///
/// The engine computes every freshness and expiry deadline from `now()` and
/// drives its dedupe and TTL timers through `sleep_until()`, so swapping the
/// clock swaps the whole notion of time.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// A name for tracing.
    fn name(&self) -> &'static str;

    /// The current instant.
    fn now(&self) -> Instant;

    /// Resolve once `deadline` has been reached.
    async fn sleep_until(&self, deadline: Instant);
}

/// Clock backed by `tokio::time`.
///
/// Honours a paused runtime clock (`tokio::time::pause`), which is how the
/// test suite advances time deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn name(&self) -> &'static str {
        "tokio"
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}
