use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span, trace, warn};

use crate::builder::SwrCacheBuilder;
use crate::clock::Clock;
use crate::entry::{
    EntryStatus, InFlight, Revalidation, SharedTask, Slot, StoredResult, deadline,
    saturating_deadline,
};
use crate::error::CacheError;
use crate::metrics::{CacheMetric, EvictionReason, LookupOutcome, MetricsSink};
use crate::options::CacheOptions;

/// Key-indexed state. Only ever touched under `Inner::state`.
struct State<K, V, E> {
    slots: HashMap<K, Slot<V, E>>,
    /// Stamps every in-flight task, stored result and refresh, so a timer or
    /// a late settlement can tell whether its entry is still current.
    generation: u64,
}

struct Inner<K, V, E> {
    state: Mutex<State<K, V, E>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

/// What a lookup resolved to before any suspension.
enum Resolution<V, E> {
    Ready(V),
    Pending(SharedTask<V, E>),
}

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Dedupe,
    Ttl,
}

/// In-process memoizing cache with stale-while-revalidate support.
///
/// `SwrCache` coalesces concurrent lookups of the same key into one task,
/// keeps successful results for the `revalidate` window, refreshes stale
/// results in the background, and evicts them after `ttl`. Clones share the
/// same state.
///
/// Tasks and timers run on the ambient tokio runtime, so `get` must be
/// called from within one.
pub struct SwrCache<K, V, E> {
    inner: Arc<Inner<K, V, E>>,
}

impl<K, V, E> Clone for SwrCache<K, V, E> {
    fn clone(&self) -> Self {
        SwrCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, E> Default for SwrCache<K, V, E>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> SwrCache<K, V, E>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a cache driven by the tokio clock, without metrics.
    pub fn new() -> Self {
        SwrCacheBuilder::new().build()
    }

    pub(crate) fn from_parts(clock: Arc<dyn Clock>, metrics: Option<Arc<dyn MetricsSink>>) -> Self {
        SwrCache {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    slots: HashMap::new(),
                    generation: 0,
                }),
                clock,
                metrics,
            }),
        }
    }

    /// Return the value for `key`, computing it with `factory` when needed.
    ///
    /// Lookups resolve in this order:
    /// - If a task for `key` is in flight, await that task
    /// - If a stored value is fresh, return it without calling `factory`
    /// - If a stored value is stale, return it and refresh it in the background
    /// - Otherwise start a task from `factory` and await it
    ///
    /// `factory` is called at most once, and only on a miss or when a
    /// refresh starts. Dropping the returned future never cancels the task.
    ///
    /// # Errors
    /// * `CacheError::Factory` - the task this call awaited failed
    /// * `CacheError::InvalidRevalidate` - a stale value needed a refresh but
    ///   `options` carry no positive revalidate window
    /// * `CacheError::Panicked` - the task this call awaited panicked
    ///
    /// # Example
    /// ```ignore
    /// let options = CacheOptions::new(Duration::from_secs(5)).revalidate(Duration::from_secs(30));
    /// let post = cache.get("post:1".to_string(), || api.fetch_post(1), &options).await?;
    /// ```
    pub async fn get<F, Fut>(
        &self,
        key: K,
        factory: F,
        options: &CacheOptions<V>,
    ) -> Result<V, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        match self.inner.resolve(key, factory, options)? {
            Resolution::Ready(value) => Ok(value),
            Resolution::Pending(task) => task.await,
        }
    }

    /// Forget everything about `key` and cancel its timers.
    ///
    /// A task still running for `key` completes, but its result is not stored.
    pub fn flush(&self, key: &K) {
        let removed = self.inner.state.lock().slots.remove(key);
        if removed.is_some() {
            debug!(?key, "flushed cache key");
            self.inner.emit(CacheMetric::Evicted {
                reason: EvictionReason::Flush,
            });
        }
    }

    /// Forget every key.
    pub fn flush_all(&self) {
        let slots = std::mem::take(&mut self.inner.state.lock().slots);
        debug!(count = slots.len(), "flushed all cache keys");
        for _ in 0..slots.len() {
            self.inner.emit(CacheMetric::Evicted {
                reason: EvictionReason::Flush,
            });
        }
    }

    /// Where `key` currently is in its lifecycle, `None` when nothing is held.
    ///
    /// A stored value past its ttl is evicted here if its timer has not
    /// run yet.
    pub fn status(&self, key: &K) -> Option<EntryStatus> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        let expired = expire_lazily(&mut state.slots, key, now);
        let status = state.slots.get(key).and_then(|slot| slot.status(now));
        drop(state);

        if expired {
            self.inner.emit(CacheMetric::Evicted {
                reason: EvictionReason::Ttl,
            });
        }
        status
    }

    /// Number of keys holding a task or a stored value.
    ///
    /// A key whose ttl has passed is counted until its timer runs or a
    /// `get` or `status` call touches it.
    pub fn len(&self) -> usize {
        self.inner.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, E> Inner<K, V, E>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn emit(&self, metric: CacheMetric) {
        if let Some(sink) = &self.metrics {
            sink.emit(metric);
        }
    }

    /// Inspect and update the state for `key` in one critical section.
    ///
    /// The lock is released before `factory` runs; the slot already holds
    /// the in-flight task or the refresh marker by then, so concurrent
    /// lookups can never start a second task.
    fn resolve<F, Fut>(
        self: &Arc<Self>,
        key: K,
        factory: F,
        options: &CacheOptions<V>,
    ) -> Result<Resolution<V, E>, CacheError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let policy = *options.policy();
        let now = self.clock.now();
        let mut state = self.state.lock();
        let State { slots, generation } = &mut *state;

        let expired = expire_lazily(slots, &key, now);

        let slot = slots.entry(key.clone()).or_insert_with(Slot::new);

        if let Some(in_flight) = &slot.in_flight {
            trace!(?key, generation = in_flight.generation, "joining in-flight task");
            let task = in_flight.task.clone();
            drop(state);
            self.emit_lookup(expired, LookupOutcome::InFlight, false);
            return Ok(Resolution::Pending(task));
        }

        if let Some(stored) = slot.stored.as_mut() {
            let value = stored.value.clone();

            if stored.is_fresh(now) {
                drop(state);
                self.emit_lookup(expired, LookupOutcome::Fresh, false);
                return Ok(Resolution::Ready(value));
            }

            if stored.is_revalidating(now) {
                trace!(?key, "refresh already running, serving stale value");
                drop(state);
                self.emit_lookup(expired, LookupOutcome::Stale, false);
                return Ok(Resolution::Ready(value));
            }

            if policy.revalidate_window().is_none() {
                warn!(?key, revalidate = ?policy.revalidate, "stale value hit without a usable revalidate window");
                return Err(CacheError::InvalidRevalidate(policy.revalidate));
            }

            *generation += 1;
            let marker = Revalidation {
                generation: *generation,
                until: saturating_deadline(now, policy.dedupe),
            };
            stored.revalidating = Some(marker);
            drop(state);

            debug!(?key, generation = marker.generation, "serving stale value, refreshing in background");
            let future = catch_unwind(AssertUnwindSafe(factory));
            self.spawn_revalidation(key, marker.generation, now, future, options.clone());
            self.emit_lookup(expired, LookupOutcome::Stale, true);
            return Ok(Resolution::Ready(value));
        }

        // Nothing between registering the task and arming its timer may fail.
        let dedupe_deadline = deadline(now, policy.dedupe);
        *generation += 1;
        let task_generation = *generation;
        let (tx, rx) = oneshot::channel();
        let task: SharedTask<V, E> = rx
            .map(|received| received.unwrap_or_else(|_| Err(CacheError::Canceled)))
            .boxed()
            .shared();

        slot.in_flight = Some(InFlight {
            generation: task_generation,
            started_at: now,
            task: task.clone(),
        });
        slot.dedupe_timer = dedupe_deadline
            .map(|at| self.schedule(key.clone(), task_generation, TimerKind::Dedupe, at));
        drop(state);

        debug!(?key, generation = task_generation, "cache miss, starting task");
        // A factory that panics before returning its future settles like a
        // panicking future, so the in-flight entry is still cleaned up.
        let future = catch_unwind(AssertUnwindSafe(factory));
        self.spawn_task(key, task_generation, now, future, tx, options.clone());
        self.emit_lookup(expired, LookupOutcome::Miss, false);
        Ok(Resolution::Pending(task))
    }

    fn emit_lookup(&self, expired: bool, outcome: LookupOutcome, revalidation_started: bool) {
        if expired {
            self.emit(CacheMetric::Evicted {
                reason: EvictionReason::Ttl,
            });
        }
        self.emit(CacheMetric::Lookup {
            outcome,
            revalidation_started,
        });
    }

    /// Drive a miss-path task to completion, independent of its callers.
    fn spawn_task<Fut>(
        self: &Arc<Self>,
        key: K,
        generation: u64,
        started_at: Instant,
        future: Result<Fut, Box<dyn Any + Send>>,
        tx: oneshot::Sender<Result<V, CacheError<E>>>,
        options: CacheOptions<V>,
    ) where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let inner = Arc::downgrade(self);
        let span = debug_span!("swr_task", ?key, generation);

        tokio::spawn(
            async move {
                let outcome = into_outcome(drive(future).await);
                // Bookkeeping first, so a caller woken by the send below
                // already sees the stored value.
                if let Some(inner) = inner.upgrade() {
                    inner.complete_task(&key, generation, started_at, &outcome, &options);
                }
                // All callers may be gone; nobody needs the result then.
                let _ = tx.send(outcome);
            }
            .instrument(span),
        );
    }

    fn complete_task(
        self: &Arc<Self>,
        key: &K,
        generation: u64,
        started_at: Instant,
        outcome: &Result<V, CacheError<E>>,
        options: &CacheOptions<V>,
    ) {
        // The validator and ttl function are user code; run them unlocked.
        let retain = match outcome {
            Ok(value) => match options.policy().revalidate_window() {
                Some(window) if options.accepts(value) => Some((window, options.ttl_for(value))),
                Some(_) => {
                    debug!("result rejected by validator, not storing");
                    None
                }
                None => None,
            },
            Err(_) => None,
        };

        let now = self.clock.now();
        let mut state = self.state.lock();
        let State {
            slots,
            generation: counter,
        } = &mut *state;

        let mut stored = false;
        match slots.get_mut(key) {
            Some(slot) if slot.in_flight.as_ref().map(|f| f.generation) == Some(generation) => {
                slot.in_flight = None;
                slot.cancel_dedupe_timer();

                if let (Ok(value), Some((window, ttl))) = (outcome, retain) {
                    *counter += 1;
                    self.store(slot, key, *counter, value.clone(), now, window, ttl);
                    stored = true;
                }

                if slot.is_vacant() {
                    slots.remove(key);
                }
            }
            _ => debug!("task settled after its entry was flushed or detached"),
        }
        drop(state);

        match outcome {
            Ok(_) => trace!(stored, "task settled"),
            Err(_) => debug!("task failed, nothing stored"),
        }
        self.emit(CacheMetric::Settled {
            success: outcome.is_ok(),
            stored,
            latency_ms: elapsed_ms(started_at, now),
        });
    }

    /// Refresh a stale value. Failures stay here; nobody awaits this task.
    fn spawn_revalidation<Fut>(
        self: &Arc<Self>,
        key: K,
        generation: u64,
        started_at: Instant,
        future: Result<Fut, Box<dyn Any + Send>>,
        options: CacheOptions<V>,
    ) where
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let inner = Arc::downgrade(self);
        let span = debug_span!("swr_revalidate", ?key, generation);

        tokio::spawn(
            async move {
                let outcome = into_outcome(drive(future).await);
                if let Some(inner) = inner.upgrade() {
                    inner.complete_revalidation(&key, generation, started_at, outcome, &options);
                }
            }
            .instrument(span),
        );
    }

    fn complete_revalidation(
        self: &Arc<Self>,
        key: &K,
        generation: u64,
        started_at: Instant,
        outcome: Result<V, CacheError<E>>,
        options: &CacheOptions<V>,
    ) {
        let success = outcome.is_ok();
        let retain = match &outcome {
            Ok(value) if options.accepts(value) => Some(options.ttl_for(value)),
            _ => None,
        };

        let now = self.clock.now();
        let mut state = self.state.lock();
        let State {
            slots,
            generation: counter,
        } = &mut *state;

        let slot = slots
            .get_mut(key)
            .filter(|slot| {
                slot.stored
                    .as_ref()
                    .and_then(|s| s.revalidating)
                    .is_some_and(|r| r.generation == generation)
            });
        let Some(slot) = slot else {
            drop(state);
            debug!("refresh settled after its entry was flushed or superseded");
            self.emit(CacheMetric::Revalidated {
                success,
                stored: false,
                latency_ms: elapsed_ms(started_at, now),
            });
            return;
        };

        let mut stored = false;
        match (outcome, retain, options.policy().revalidate_window()) {
            (Ok(value), Some(ttl), Some(window)) => {
                *counter += 1;
                self.store(slot, key, *counter, value, now, window, ttl);
                stored = true;
            }
            (Ok(_), ..) => {
                if let Some(previous) = slot.stored.as_mut() {
                    previous.revalidating = None;
                }
                debug!("refreshed value rejected, keeping stale value");
            }
            (Err(_), ..) => {
                if let Some(previous) = slot.stored.as_mut() {
                    previous.revalidating = None;
                }
                warn!("background refresh failed, keeping stale value");
            }
        }
        drop(state);

        self.emit(CacheMetric::Revalidated {
            success,
            stored,
            latency_ms: elapsed_ms(started_at, now),
        });
    }

    /// Write `value` into `slot` and re-arm its ttl timer.
    ///
    /// A ttl too large for `Instant` means the value never expires.
    #[allow(clippy::too_many_arguments)]
    fn store(
        self: &Arc<Self>,
        slot: &mut Slot<V, E>,
        key: &K,
        generation: u64,
        value: V,
        now: Instant,
        window: Duration,
        ttl: Option<Duration>,
    ) {
        let expires_at = ttl.and_then(|ttl| deadline(now, ttl));
        slot.stored = Some(StoredResult::new(
            generation,
            value,
            saturating_deadline(now, window),
            expires_at,
        ));
        let timer = expires_at.map(|at| self.schedule(key.clone(), generation, TimerKind::Ttl, at));
        slot.replace_ttl_timer(timer);
    }

    /// Run `kind` for `key` at `deadline` unless the timer is aborted first.
    fn schedule(
        self: &Arc<Self>,
        key: K,
        generation: u64,
        kind: TimerKind,
        deadline: Instant,
    ) -> AbortHandle {
        let inner = Arc::downgrade(self);
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            clock.sleep_until(deadline).await;
            if let Some(inner) = inner.upgrade() {
                inner.fire(&key, generation, kind);
            }
        })
        .abort_handle()
    }

    fn fire(&self, key: &K, generation: u64, kind: TimerKind) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(slot) = state.slots.get_mut(key) else {
            return;
        };

        let reason = match kind {
            TimerKind::Dedupe => {
                let Some(in_flight) = slot.in_flight.as_ref().filter(|f| f.generation == generation)
                else {
                    return;
                };
                debug!(
                    ?key,
                    generation,
                    age = ?(now - in_flight.started_at),
                    "dedupe window closed, detaching task"
                );
                slot.in_flight = None;
                // This timer is the one running; nothing to abort.
                slot.dedupe_timer = None;
                if slot.is_vacant() {
                    state.slots.remove(key);
                }
                EvictionReason::Dedupe
            }
            TimerKind::Ttl => {
                if slot.stored.as_ref().map(|s| s.generation) != Some(generation) {
                    return;
                }
                debug!(?key, generation, "ttl elapsed, evicting");
                slot.ttl_timer = None;
                state.slots.remove(key);
                EvictionReason::Ttl
            }
        };
        drop(state);

        self.emit(CacheMetric::Evicted { reason });
    }
}

/// Drop a stored result that outlived its ttl before its timer fired.
fn expire_lazily<K, V, E>(slots: &mut HashMap<K, Slot<V, E>>, key: &K, now: Instant) -> bool
where
    K: Eq + Hash + Debug,
{
    let Some(slot) = slots.get_mut(key) else {
        return false;
    };
    if !slot.stored.as_ref().is_some_and(|s| s.is_expired(now)) {
        return false;
    }

    trace!(?key, "stored result outlived its ttl");
    slot.stored = None;
    slot.replace_ttl_timer(None);
    if slot.is_vacant() {
        slots.remove(key);
    }
    true
}

async fn drive<Fut, T>(
    future: Result<Fut, Box<dyn Any + Send>>,
) -> Result<T, Box<dyn Any + Send>>
where
    Fut: Future<Output = T>,
{
    match future {
        Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
        Err(panic) => Err(panic),
    }
}

fn into_outcome<V, E>(
    result: Result<Result<V, E>, Box<dyn Any + Send>>,
) -> Result<V, CacheError<E>> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(CacheError::factory(error)),
        Err(_) => {
            warn!("factory panicked");
            Err(CacheError::Panicked)
        }
    }
}

fn elapsed_ms(start: Instant, end: Instant) -> f64 {
    end.saturating_duration_since(start).as_secs_f64() * 1000.0
}
