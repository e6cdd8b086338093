use futures::future::{BoxFuture, Shared};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::CacheError;

/// The settlement of one task, cloned out to every caller awaiting it.
pub(crate) type SharedTask<V, E> = Shared<BoxFuture<'static, Result<V, CacheError<E>>>>;

/// Stand-in for deadlines past what `Instant` can represent; about 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + window`, or `None` when the sum overflows `Instant`.
pub(crate) fn deadline(now: Instant, window: Duration) -> Option<Instant> {
    now.checked_add(window)
}

/// `now + window`, clamped to a far-future instant on overflow.
pub(crate) fn saturating_deadline(now: Instant, window: Duration) -> Instant {
    deadline(now, window)
        .or_else(|| deadline(now, FAR_FUTURE))
        .unwrap_or(now)
}

/// Lifecycle state of a key, as reported by [`SwrCache::status`](crate::SwrCache::status).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// A task is computing the value and new lookups join it.
    InFlight,
    /// A stored value is served without calling the factory.
    Fresh,
    /// A stored value is past its fresh window; the next lookup refreshes it.
    Stale,
    /// A stored value is past its fresh window and a refresh is running.
    Revalidating,
}

/// A task attached to a key.
pub(crate) struct InFlight<V, E> {
    pub generation: u64,
    pub started_at: Instant,
    pub task: SharedTask<V, E>,
}

/// Marker written on a stored result while a background refresh runs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Revalidation {
    pub generation: u64,
    /// Past this point a stale lookup may start a new refresh.
    pub until: Instant,
}

/// A computed value kept for later lookups.
pub(crate) struct StoredResult<V> {
    pub generation: u64,
    pub value: V,
    pub fresh_until: Instant,
    pub expires_at: Option<Instant>,
    pub revalidating: Option<Revalidation>,
}

impl<V> StoredResult<V> {
    pub fn new(generation: u64, value: V, fresh_until: Instant, expires_at: Option<Instant>) -> Self {
        StoredResult {
            generation,
            value,
            fresh_until,
            expires_at,
            revalidating: None,
        }
    }

    /// Check if the entry is still fresh (not yet stale).
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.fresh_until
    }

    /// Check if the entry has outlived its time to live.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Check if a refresh is running and still within its window.
    pub fn is_revalidating(&self, now: Instant) -> bool {
        self.revalidating.is_some_and(|r| now < r.until)
    }
}

/// Everything the engine tracks for one key.
///
/// Dropping a slot aborts its timers, so removing a key from the map is
/// enough to cancel them.
pub(crate) struct Slot<V, E> {
    pub in_flight: Option<InFlight<V, E>>,
    pub stored: Option<StoredResult<V>>,
    pub dedupe_timer: Option<AbortHandle>,
    pub ttl_timer: Option<AbortHandle>,
}

impl<V, E> Slot<V, E> {
    pub fn new() -> Self {
        Slot {
            in_flight: None,
            stored: None,
            dedupe_timer: None,
            ttl_timer: None,
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.in_flight.is_none() && self.stored.is_none()
    }

    pub fn status(&self, now: Instant) -> Option<EntryStatus> {
        if let Some(stored) = &self.stored
            && !stored.is_expired(now)
        {
            return Some(if stored.is_fresh(now) {
                EntryStatus::Fresh
            } else if stored.is_revalidating(now) {
                EntryStatus::Revalidating
            } else {
                EntryStatus::Stale
            });
        }
        self.in_flight.as_ref().map(|_| EntryStatus::InFlight)
    }

    pub fn cancel_dedupe_timer(&mut self) {
        if let Some(timer) = self.dedupe_timer.take() {
            timer.abort();
        }
    }

    pub fn replace_ttl_timer(&mut self, timer: Option<AbortHandle>) {
        if let Some(old) = std::mem::replace(&mut self.ttl_timer, timer) {
            old.abort();
        }
    }
}

impl<V, E> Drop for Slot<V, E> {
    fn drop(&mut self) {
        self.cancel_dedupe_timer();
        self.replace_ttl_timer(None);
    }
}
