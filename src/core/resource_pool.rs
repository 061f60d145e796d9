//! Keyed resource pool with bounded capacity and staleness sweeps.
//!
//! One `parking_lot::Mutex` guards the per-key free lists and checkout tables;
//! a `parking_lot::Condvar` parks callers waiting for capacity. Factory calls
//! (`create`, `recycle`, `dispose`) always run with the lock released: a slot
//! being created is reserved under the lock through the `pending` counter so the
//! `free + in_use + pending <= max_size` bound holds at every instant.
//! A free resource being validated before reuse already counts as checked out.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::core::events::{PoolEvent, PoolEventKind, PoolEventSink};
use crate::core::lifecycle::DisposalReport;
use crate::core::resource::{
    Disposable, PoolKey, ResourceFactory, ResourceId, ResourceInfo, ResourceState,
};
use crate::core::PoolError;
use crate::util::clock::{Clock, SystemClock};

/// Idle resource sitting in a free list.
struct Slot<H> {
    id: ResourceId,
    handle: H,
    created_at: Instant,
    last_validated_at: Instant,
}

/// Bookkeeping for a checked-out resource; the handle itself lives in the `PooledHandle`.
#[derive(Debug, Clone, Copy)]
struct Checkout {
    created_at: Instant,
    last_validated_at: Instant,
    /// Key generation at checkout; older generations are disposed on return.
    generation: u64,
}

/// Disposed resources remembered for `resource_info`.
const HISTORY_CAPACITY: usize = 256;

/// Source of `PooledHandle::checkout_id`, shared by every pool.
static NEXT_CHECKOUT: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Default, Clone, Copy)]
struct KeyCounters {
    created: u64,
    disposed: u64,
    acquisitions: u64,
    exhausted: u64,
}

impl KeyCounters {
    fn absorb(&mut self, other: Self) {
        self.created += other.created;
        self.disposed += other.disposed;
        self.acquisitions += other.acquisitions;
        self.exhausted += other.exhausted;
    }
}

/// Resources of one key.
struct KeyedPool<H> {
    config: PoolConfig,
    refresh: Duration,
    /// LIFO: the most recently returned resource is reissued first.
    free: VecDeque<Slot<H>>,
    in_use: HashMap<ResourceId, Checkout>,
    /// Slots reserved for creations running outside the lock.
    pending: usize,
    /// Bumped by `mark_dirty`.
    generation: u64,
    counters: KeyCounters,
}

impl<H> KeyedPool<H> {
    fn new(config: PoolConfig, refresh: Duration) -> Self {
        Self {
            config,
            refresh,
            free: VecDeque::new(),
            in_use: HashMap::new(),
            pending: 0,
            generation: 0,
            counters: KeyCounters::default(),
        }
    }

    fn live(&self) -> usize {
        self.free.len() + self.in_use.len() + self.pending
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            keys: 1,
            active: self.in_use.len(),
            idle: self.free.len(),
            created: self.counters.created,
            disposed: self.counters.disposed,
            acquisitions: self.counters.acquisitions,
            exhausted: self.counters.exhausted,
        }
    }
}

struct PoolState<H> {
    keys: HashMap<PoolKey, KeyedPool<H>>,
    defaults: PoolConfig,
    overrides: HashMap<PoolKey, PoolConfig>,
    /// Set by `set_refresh_interval`; wins over configured minutes.
    refresh_override: Option<Duration>,
    /// Counters of evicted keys, so totals survive eviction.
    retired: KeyCounters,
    /// Stale and disposed resources, oldest first.
    history: VecDeque<ResourceInfo>,
    closed: bool,
}

impl<H> PoolState<H> {
    fn config_for(&self, key: &PoolKey) -> PoolConfig {
        self.overrides.get(key).copied().unwrap_or(self.defaults)
    }

    fn keyed(&mut self, key: &PoolKey) -> &mut KeyedPool<H> {
        let config = self.config_for(key);
        let refresh = self
            .refresh_override
            .unwrap_or_else(|| config.refresh_interval());
        self.keys.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, max_size = config.max_size, "creating keyed pool");
            KeyedPool::new(config, refresh)
        })
    }

    fn remember(&mut self, info: ResourceInfo) {
        if let Some(entry) = self.history.iter_mut().find(|entry| entry.id == info.id) {
            *entry = info;
            return;
        }
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(info);
    }
}

/// Aggregated pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of keys with bookkeeping.
    pub keys: usize,
    /// Resources currently checked out.
    pub active: usize,
    /// Resources currently free.
    pub idle: usize,
    /// Total handles created.
    pub created: u64,
    /// Total handles disposed.
    pub disposed: u64,
    /// Total successful acquisitions.
    pub acquisitions: u64,
    /// Total acquisitions that failed with `PoolExhausted`.
    pub exhausted: u64,
}

/// How long a checkout may wait for capacity.
#[derive(Clone, Copy)]
enum Wait {
    /// Use the key's exhaustion policy.
    Configured,
    /// Override: `None` fails fast.
    Exactly(Option<Duration>),
}

enum Outcome<H> {
    Reuse(Slot<H>),
    Create,
    Exhausted,
}

struct PoolInner<F: ResourceFactory> {
    factory: F,
    state: Mutex<PoolState<F::Handle>>,
    /// Signalled whenever capacity may have become available.
    available: Condvar,
    clock: Arc<dyn Clock>,
    events: Option<Mutex<Box<dyn PoolEventSink>>>,
}

/// Bounded, keyed pool of reusable resources.
///
/// Cloning is cheap and yields another handle to the same pool, so the pool can
/// be passed to collaborators and background sweepers explicitly.
///
/// # Example
///
/// ```rust,ignore
/// let pool = ResourcePool::new(RepositoryFactory::connect(url)?, PoolConfig::with_max_size(8))?;
/// let key = PoolKey::new("editor", "preview");
///
/// let session = pool.acquire(&key)?;
/// session.access()?.query("/content")?;
/// session.release()?;
/// ```
pub struct ResourcePool<F: ResourceFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ResourceFactory> Clone for ResourcePool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for ResourcePool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePool")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> ResourcePool<F> {
    /// Create a pool applying `config` to every key.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        Ok(Self::from_parts(
            factory,
            config,
            HashMap::new(),
            Arc::new(SystemClock),
            None,
        ))
    }

    /// Assemble a pool from validated parts.
    pub(crate) fn from_parts(
        factory: F,
        defaults: PoolConfig,
        overrides: HashMap<PoolKey, PoolConfig>,
        clock: Arc<dyn Clock>,
        events: Option<Box<dyn PoolEventSink>>,
    ) -> Self {
        info!(
            max_size = defaults.max_size,
            refresh_interval_minutes = defaults.refresh_interval_minutes,
            overrides = overrides.len(),
            "resource pool initialized"
        );
        Self {
            inner: Arc::new(PoolInner {
                factory,
                state: Mutex::new(PoolState {
                    keys: HashMap::new(),
                    defaults,
                    overrides,
                    refresh_override: None,
                    retired: KeyCounters::default(),
                    history: VecDeque::new(),
                    closed: false,
                }),
                available: Condvar::new(),
                clock,
                events: events.map(Mutex::new),
            }),
        }
    }

    /// Acquire a resource for `key`, applying the key's exhaustion policy.
    ///
    /// A free resource is reused if one exists; otherwise a new one is created
    /// while the key is under `max_size`.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolExhausted` if no capacity became available in time
    /// - `PoolError::PoolClosed` after [`ResourcePool::dispose_all`]
    /// - any error returned by the factory's `create`
    pub fn acquire(&self, key: &PoolKey) -> Result<PooledHandle<F>, PoolError> {
        self.checkout(key, Wait::Configured)
    }

    /// Acquire without waiting, whatever the configured policy.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire`].
    pub fn try_acquire(&self, key: &PoolKey) -> Result<PooledHandle<F>, PoolError> {
        self.checkout(key, Wait::Exactly(None))
    }

    /// Acquire, waiting at most `timeout` for capacity.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire`].
    pub fn acquire_timeout(
        &self,
        key: &PoolKey,
        timeout: Duration,
    ) -> Result<PooledHandle<F>, PoolError> {
        self.checkout(key, Wait::Exactly(Some(timeout)))
    }

    /// Acquire from an async context; the wait runs on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire`], plus `PoolError::Internal` if the
    /// blocking task panicked.
    #[cfg(feature = "tokio-runtime")]
    pub async fn acquire_async(&self, key: &PoolKey) -> Result<PooledHandle<F>, PoolError> {
        let pool = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || pool.acquire(&key))
            .await
            .map_err(|e| PoolError::Internal(format!("acquire task failed: {e}")))?
    }

    /// Return a resource to the free list of its key.
    ///
    /// Releasing a handle that was already returned is a no-op. If the pool is
    /// closed or the factory declines to recycle the handle, it is disposed.
    ///
    /// # Errors
    ///
    /// - `PoolError::UnknownResource` if the handle belongs to another pool
    /// - `PoolError::DisposalFailure` if the handle had to be disposed and that failed
    pub fn release(&self, handle: &PooledHandle<F>) -> Result<(), PoolError> {
        self.ensure_owned(handle)?;
        match handle.take() {
            Some(resource) => self.check_in(
                &handle.inner.key,
                handle.inner.id,
                handle.inner.created_at,
                resource,
            ),
            None => {
                debug!(resource = %handle.inner.id, "release of already returned resource ignored");
                Ok(())
            }
        }
    }

    /// Dispose a resource immediately, whatever its state.
    ///
    /// A resource that was already returned is removed from the free list and
    /// disposed; one that has since been handed to another caller is left alone.
    ///
    /// # Errors
    ///
    /// - `PoolError::UnknownResource` if the handle belongs to another pool
    /// - `PoolError::DisposalFailure` if the factory failed to dispose the handle
    pub fn invalidate(&self, handle: &PooledHandle<F>) -> Result<(), PoolError> {
        self.ensure_owned(handle)?;
        handle.mark_invalid();
        match handle.take() {
            Some(resource) => self.discard(
                &handle.inner.key,
                handle.inner.id,
                handle.inner.created_at,
                resource,
            ),
            None => self.invalidate_free(&handle.inner.key, handle.inner.id),
        }
    }

    /// Change the staleness threshold for every key; applies from the next sweep.
    pub fn set_refresh_interval(&self, interval: Duration) {
        let mut state = self.inner.state.lock();
        state.refresh_override = Some(interval);
        for pool in state.keys.values_mut() {
            pool.refresh = interval;
        }
        info!(refresh_ms = interval.as_millis(), "refresh interval updated");
    }

    /// Retire every current resource of `key`, or of every key when `None`.
    ///
    /// Free resources are disposed now. Checked-out ones stay with their
    /// holders and are disposed when they come back instead of being reused.
    /// Returns the number of free resources disposed.
    pub fn mark_dirty(&self, key: Option<&PoolKey>) -> usize {
        let drained = {
            let mut state = self.inner.state.lock();
            let mut drained = Vec::new();
            for (k, pool) in state.keys.iter_mut() {
                if key.is_some_and(|key| key != k) {
                    continue;
                }
                pool.generation += 1;
                pool.counters.disposed += pool.free.len() as u64;
                drained.extend(pool.free.drain(..).map(|slot| (k.clone(), slot)));
            }
            drained
        };

        let count = drained.len();
        info!(
            key = %key.map_or_else(|| "*".to_owned(), ToString::to_string),
            idle_disposed = count,
            "pool marked dirty"
        );
        if count == 0 {
            return 0;
        }
        self.inner.available.notify_all();
        for (key, slot) in drained {
            self.emit(PoolEventKind::Invalidated, &key, Some(slot.id));
            // Logged by destroy.
            let _ = self.destroy(&key, slot.id, slot.created_at, slot.handle);
        }
        count
    }

    /// Dispose every free resource idle for longer than its key's refresh interval.
    ///
    /// Stale resources are unlinked from the free list under the lock, so a
    /// concurrent `acquire` can never receive one. Checked-out resources are
    /// not touched. Returns the number of resources disposed.
    pub fn sweep(&self) -> usize {
        let now = self.inner.clock.now();
        let mut stale = Vec::new();
        {
            let mut state = self.inner.state.lock();
            for (key, pool) in state.keys.iter_mut() {
                let refresh = pool.refresh;
                let drained: Vec<Slot<F::Handle>> = pool.free.drain(..).collect();
                for slot in drained {
                    if now.saturating_duration_since(slot.last_validated_at) > refresh {
                        pool.counters.disposed += 1;
                        stale.push((key.clone(), slot));
                    } else {
                        pool.free.push_back(slot);
                    }
                }
            }
            for (key, slot) in &stale {
                state.remember(ResourceInfo {
                    id: slot.id,
                    key: key.clone(),
                    created_at: slot.created_at,
                    last_validated_at: slot.last_validated_at,
                    state: ResourceState::Stale,
                });
            }
        }

        let count = stale.len();
        if count == 0 {
            return 0;
        }
        self.inner.available.notify_all();

        let mut failures = 0usize;
        for (key, slot) in stale {
            self.emit(PoolEventKind::Swept, &key, Some(slot.id));
            if self.destroy(&key, slot.id, slot.created_at, slot.handle).is_err() {
                failures += 1;
            }
        }
        info!(swept = count, failures = failures, "disposed stale resources");
        count
    }

    /// Close the pool and dispose every free resource.
    ///
    /// Later acquisitions fail with `PoolClosed`, waiting ones are woken and
    /// fail too. Checked-out resources are disposed as they come back.
    /// Calling this again disposes nothing.
    pub fn dispose_all(&self) -> DisposalReport {
        let drained = {
            let mut state = self.inner.state.lock();
            if !state.closed {
                info!("closing resource pool");
            }
            state.closed = true;
            let mut drained = Vec::new();
            for (key, pool) in state.keys.iter_mut() {
                pool.counters.disposed += pool.free.len() as u64;
                drained.extend(pool.free.drain(..).map(|slot| (key.clone(), slot)));
            }
            drained
        };
        self.inner.available.notify_all();

        let mut report = DisposalReport::default();
        for (key, slot) in drained {
            let id = slot.id;
            match self.destroy(&key, id, slot.created_at, slot.handle) {
                Ok(()) => report.disposed.push(id),
                Err(e) => report.failures.push(e),
            }
        }
        report
    }

    /// Whether [`ResourcePool::dispose_all`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Drop bookkeeping for keys with no free, checked-out or pending resources.
    ///
    /// When `targets` is non-empty only keys whose target is listed are evicted.
    /// Returns the number of keys removed.
    pub fn evict_inactive_keys(&self, targets: &[String]) -> usize {
        let mut state = self.inner.state.lock();
        let mut retired = KeyCounters::default();
        let before = state.keys.len();
        state.keys.retain(|key, pool| {
            let evictable = pool.live() == 0
                && (targets.is_empty() || targets.iter().any(|t| t == key.target()));
            if evictable {
                retired.absorb(pool.counters);
            }
            !evictable
        });
        state.retired.absorb(retired);
        let evicted = before - state.keys.len();
        if evicted > 0 {
            debug!(evicted = evicted, "evicted inactive keys");
        }
        evicted
    }

    /// Statistics summed over every key.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let mut stats = PoolStats {
            created: state.retired.created,
            disposed: state.retired.disposed,
            acquisitions: state.retired.acquisitions,
            exhausted: state.retired.exhausted,
            ..PoolStats::default()
        };
        for pool in state.keys.values() {
            let s = pool.stats();
            stats.keys += 1;
            stats.active += s.active;
            stats.idle += s.idle;
            stats.created += s.created;
            stats.disposed += s.disposed;
            stats.acquisitions += s.acquisitions;
            stats.exhausted += s.exhausted;
        }
        stats
    }

    /// Statistics for one key, if it has bookkeeping.
    #[must_use]
    pub fn key_stats(&self, key: &PoolKey) -> Option<PoolStats> {
        self.inner.state.lock().keys.get(key).map(KeyedPool::stats)
    }

    /// Keys currently tracked.
    #[must_use]
    pub fn keys(&self) -> Vec<PoolKey> {
        self.inner.state.lock().keys.keys().cloned().collect()
    }

    /// Ids of the free resources of `key`, most recently returned last.
    #[must_use]
    pub fn free_ids(&self, key: &PoolKey) -> Vec<ResourceId> {
        self.inner
            .state
            .lock()
            .keys
            .get(key)
            .map(|pool| pool.free.iter().map(|slot| slot.id).collect())
            .unwrap_or_default()
    }

    /// Describe a resource.
    ///
    /// Live resources are reported as `Free` or `InUse`. A swept resource is
    /// `Stale` until its disposal finishes, then `Disposed`; only the most
    /// recent stale and disposed resources are remembered.
    #[must_use]
    pub fn resource_info(&self, id: ResourceId) -> Option<ResourceInfo> {
        let state = self.inner.state.lock();
        let live = state.keys.iter().find_map(|(key, pool)| {
            if let Some(checkout) = pool.in_use.get(&id) {
                return Some(ResourceInfo {
                    id,
                    key: key.clone(),
                    created_at: checkout.created_at,
                    last_validated_at: checkout.last_validated_at,
                    state: ResourceState::InUse,
                });
            }
            pool.free.iter().find(|slot| slot.id == id).map(|slot| ResourceInfo {
                id,
                key: key.clone(),
                created_at: slot.created_at,
                last_validated_at: slot.last_validated_at,
                state: ResourceState::Free,
            })
        });
        live.or_else(|| state.history.iter().rev().find(|info| info.id == id).cloned())
    }

    fn checkout(&self, key: &PoolKey, wait: Wait) -> Result<PooledHandle<F>, PoolError> {
        let started = Instant::now();
        let mut state = self.inner.state.lock();
        let deadline = match wait {
            Wait::Configured => state.config_for(key).exhaustion_policy.wait(),
            Wait::Exactly(wait) => wait,
        }
        .map(|wait| started + wait);

        loop {
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            let now = self.inner.clock.now();
            let outcome = {
                let pool = state.keyed(key);
                if let Some(mut slot) = pool.free.pop_back() {
                    slot.last_validated_at = now;
                    pool.in_use.insert(
                        slot.id,
                        Checkout {
                            created_at: slot.created_at,
                            last_validated_at: now,
                            generation: pool.generation,
                        },
                    );
                    pool.counters.acquisitions += 1;
                    Outcome::Reuse(slot)
                } else if pool.live() < pool.config.max_size {
                    pool.pending += 1;
                    Outcome::Create
                } else {
                    Outcome::Exhausted
                }
            };

            match outcome {
                Outcome::Reuse(slot) => {
                    drop(state);
                    if self.inner.factory.validate(key, &slot.handle) {
                        debug!(key = %key, resource = %slot.id, "reusing free resource");
                        self.emit(PoolEventKind::Acquired, key, Some(slot.id));
                        return Ok(self.hand_out(key, slot.id, slot.created_at, slot.handle));
                    }
                    self.reject(key, slot);
                    state = self.inner.state.lock();
                }
                Outcome::Create => {
                    drop(state);
                    return self.create(key);
                }
                Outcome::Exhausted => {
                    let expired = deadline.is_none_or(|deadline| Instant::now() >= deadline);
                    if expired {
                        state.keyed(key).counters.exhausted += 1;
                        drop(state);
                        let waited = started.elapsed();
                        warn!(
                            key = %key,
                            waited_ms = waited.as_millis(),
                            "pool exhausted"
                        );
                        self.emit(PoolEventKind::Exhausted, key, None);
                        return Err(PoolError::PoolExhausted {
                            key: key.clone(),
                            waited,
                        });
                    }
                    if let Some(deadline) = deadline {
                        self.inner.available.wait_until(&mut state, deadline);
                    }
                }
            }
        }
    }

    /// Create a handle for a slot reserved through `pending`.
    fn create(&self, key: &PoolKey) -> Result<PooledHandle<F>, PoolError> {
        let created = self.inner.factory.create(key);
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock();
        let closed = state.closed;
        let pool = state.keyed(key);
        pool.pending = pool.pending.saturating_sub(1);

        let handle = match created {
            Ok(handle) => handle,
            Err(e) => {
                drop(state);
                self.inner.available.notify_all();
                warn!(key = %key, error = %e, "resource creation failed");
                return Err(e);
            }
        };

        let id = ResourceId::next();
        pool.counters.created += 1;
        if closed {
            pool.counters.disposed += 1;
            drop(state);
            self.inner.available.notify_all();
            self.emit(PoolEventKind::Created, key, Some(id));
            // Already logged by destroy; the caller only needs to know the pool is gone.
            let _ = self.destroy(key, id, now, handle);
            return Err(PoolError::PoolClosed);
        }

        pool.counters.acquisitions += 1;
        let generation = pool.generation;
        pool.in_use.insert(
            id,
            Checkout {
                created_at: now,
                last_validated_at: now,
                generation,
            },
        );
        drop(state);

        debug!(key = %key, resource = %id, "created resource");
        self.emit(PoolEventKind::Created, key, Some(id));
        self.emit(PoolEventKind::Acquired, key, Some(id));
        Ok(self.hand_out(key, id, now, handle))
    }

    fn hand_out(
        &self,
        key: &PoolKey,
        id: ResourceId,
        created_at: Instant,
        resource: F::Handle,
    ) -> PooledHandle<F> {
        PooledHandle {
            inner: Arc::new(HandleInner {
                id,
                checkout: NEXT_CHECKOUT.fetch_add(1, Ordering::Relaxed),
                key: key.clone(),
                created_at,
                resource: Mutex::new(Some(resource)),
                invalid: AtomicBool::new(false),
                pool: self.clone(),
            }),
        }
    }

    /// Move a returned handle back to the free list, or dispose it.
    fn check_in(
        &self,
        key: &PoolKey,
        id: ResourceId,
        created_at: Instant,
        mut resource: F::Handle,
    ) -> Result<(), PoolError> {
        let reusable = self.inner.factory.recycle(key, &mut resource);
        let now = self.inner.clock.now();
        let mut resource = Some(resource);
        let mut current = true;
        {
            let mut state = self.inner.state.lock();
            let closed = state.closed;
            if let Some(pool) = state.keys.get_mut(key) {
                let generation = pool.generation;
                current = pool
                    .in_use
                    .remove(&id)
                    .is_none_or(|checkout| checkout.generation == generation);
                if !closed && reusable && current && pool.live() < pool.config.max_size {
                    if let Some(handle) = resource.take() {
                        pool.free.push_back(Slot {
                            id,
                            handle,
                            created_at,
                            last_validated_at: now,
                        });
                    }
                } else {
                    pool.counters.disposed += 1;
                }
            }
        }
        self.inner.available.notify_all();

        match resource {
            None => {
                debug!(key = %key, resource = %id, "released resource");
                self.emit(PoolEventKind::Released, key, Some(id));
                Ok(())
            }
            Some(handle) => {
                debug!(
                    key = %key,
                    resource = %id,
                    recycled = reusable,
                    dirty = !current,
                    "returned resource not reusable, disposing"
                );
                self.destroy(key, id, created_at, handle)
            }
        }
    }

    /// Dispose a checked-out handle.
    fn discard(
        &self,
        key: &PoolKey,
        id: ResourceId,
        created_at: Instant,
        resource: F::Handle,
    ) -> Result<(), PoolError> {
        {
            let mut state = self.inner.state.lock();
            if let Some(pool) = state.keys.get_mut(key) {
                if pool.in_use.remove(&id).is_some() {
                    pool.counters.disposed += 1;
                }
            }
        }
        self.inner.available.notify_all();
        debug!(key = %key, resource = %id, "invalidating resource");
        self.emit(PoolEventKind::Invalidated, key, Some(id));
        self.destroy(key, id, created_at, resource)
    }

    /// Dispose a free resource that failed validation on its way out.
    fn reject(&self, key: &PoolKey, slot: Slot<F::Handle>) {
        {
            let mut state = self.inner.state.lock();
            if let Some(pool) = state.keys.get_mut(key) {
                if pool.in_use.remove(&slot.id).is_some() {
                    pool.counters.disposed += 1;
                    pool.counters.acquisitions = pool.counters.acquisitions.saturating_sub(1);
                }
            }
        }
        self.inner.available.notify_all();
        warn!(key = %key, resource = %slot.id, "idle resource failed validation, disposing");
        self.emit(PoolEventKind::Invalidated, key, Some(slot.id));
        // Logged by destroy.
        let _ = self.destroy(key, slot.id, slot.created_at, slot.handle);
    }

    /// Dispose a resource that was already returned, if it is still free.
    fn invalidate_free(&self, key: &PoolKey, id: ResourceId) -> Result<(), PoolError> {
        let slot = {
            let mut state = self.inner.state.lock();
            state.keys.get_mut(key).and_then(|pool| {
                let slot = pool
                    .free
                    .iter()
                    .position(|slot| slot.id == id)
                    .and_then(|idx| pool.free.remove(idx));
                if slot.is_some() {
                    pool.counters.disposed += 1;
                }
                slot
            })
        };
        match slot {
            Some(slot) => {
                self.inner.available.notify_all();
                self.emit(PoolEventKind::Invalidated, key, Some(id));
                self.destroy(key, id, slot.created_at, slot.handle)
            }
            None => {
                debug!(key = %key, resource = %id, "resource already disposed or reissued");
                Ok(())
            }
        }
    }

    /// Hand a handle to the factory for disposal. Failures are logged; the
    /// resource is gone either way.
    fn destroy(
        &self,
        key: &PoolKey,
        id: ResourceId,
        created_at: Instant,
        resource: F::Handle,
    ) -> Result<(), PoolError> {
        let result = self.inner.factory.dispose(key, resource);
        let now = self.inner.clock.now();
        self.inner.state.lock().remember(ResourceInfo {
            id,
            key: key.clone(),
            created_at,
            last_validated_at: now,
            state: ResourceState::Disposed,
        });
        self.emit(PoolEventKind::Disposed, key, Some(id));
        result.map_err(|e| {
            warn!(key = %key, resource = %id, error = %e, "resource disposal failed");
            PoolError::DisposalFailure {
                id,
                reason: e.to_string(),
            }
        })
    }

    fn ensure_owned(&self, handle: &PooledHandle<F>) -> Result<(), PoolError> {
        if Arc::ptr_eq(&handle.inner.pool.inner, &self.inner) {
            Ok(())
        } else {
            Err(PoolError::UnknownResource(handle.inner.id))
        }
    }

    fn emit(&self, kind: PoolEventKind, key: &PoolKey, id: Option<ResourceId>) {
        if let Some(sink) = &self.inner.events {
            sink.lock().record(PoolEvent::new(kind, key.clone(), id));
        }
    }
}

struct HandleInner<F: ResourceFactory> {
    id: ResourceId,
    checkout: u64,
    key: PoolKey,
    created_at: Instant,
    /// `None` once returned to the pool.
    resource: Mutex<Option<F::Handle>>,
    invalid: AtomicBool,
    pool: ResourcePool<F>,
}

impl<F: ResourceFactory> Drop for HandleInner<F> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.get_mut().take() else {
            return;
        };
        let result = if self.invalid.load(Ordering::Acquire) {
            self.pool.discard(&self.key, self.id, self.created_at, resource)
        } else {
            self.pool.check_in(&self.key, self.id, self.created_at, resource)
        };
        if let Err(e) = result {
            warn!(resource = %self.id, error = %e, "failed to return dropped resource");
        }
    }
}

/// A checked-out resource.
///
/// Clones share the same checkout (they are one logical holder, e.g. the caller
/// and its unit of work's registry). The resource goes back to the pool on the
/// first `release`/`invalidate` or when the last clone is dropped; later calls
/// are no-ops.
pub struct PooledHandle<F: ResourceFactory> {
    inner: Arc<HandleInner<F>>,
}

impl<F: ResourceFactory> Clone for PooledHandle<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ResourceFactory> fmt::Debug for PooledHandle<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledHandle")
            .field("id", &self.inner.id)
            .field("checkout", &self.inner.checkout)
            .field("key", &self.inner.key)
            .field("returned", &self.is_returned())
            .field("invalid", &self.is_marked_invalid())
            .finish()
    }
}

impl<F: ResourceFactory> PooledHandle<F> {
    /// Resource identifier.
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.id
    }

    /// Identifier of this checkout; a reissued resource gets a new one.
    #[must_use]
    pub fn checkout_id(&self) -> u64 {
        self.inner.checkout
    }

    /// Key of the owning pool.
    #[must_use]
    pub fn key(&self) -> &PoolKey {
        &self.inner.key
    }

    /// When the underlying handle was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.inner.created_at
    }

    /// Whether the resource has gone back to the pool.
    #[must_use]
    pub fn is_returned(&self) -> bool {
        self.inner.resource.lock().is_none()
    }

    /// Flag the resource as broken so lifecycle disposal discards it.
    pub fn mark_invalid(&self) {
        self.inner.invalid.store(true, Ordering::Release);
    }

    /// Whether [`PooledHandle::mark_invalid`] was called.
    #[must_use]
    pub fn is_marked_invalid(&self) -> bool {
        self.inner.invalid.load(Ordering::Acquire)
    }

    /// Lock the underlying handle for use.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyReturned` once the resource went back to the pool.
    pub fn access(&self) -> Result<MappedMutexGuard<'_, F::Handle>, PoolError> {
        MutexGuard::try_map(self.inner.resource.lock(), |slot| slot.as_mut())
            .map_err(|_| PoolError::AlreadyReturned(self.inner.id))
    }

    /// Run `f` with the underlying handle.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyReturned` once the resource went back to the pool.
    pub fn with<R>(&self, f: impl FnOnce(&mut F::Handle) -> R) -> Result<R, PoolError> {
        let mut guard = self.access()?;
        Ok(f(&mut guard))
    }

    /// Return the resource to its pool. See [`ResourcePool::release`].
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DisposalFailure` if the handle had to be disposed and that failed.
    pub fn release(&self) -> Result<(), PoolError> {
        self.inner.pool.release(self)
    }

    /// Dispose the resource. See [`ResourcePool::invalidate`].
    ///
    /// # Errors
    ///
    /// Returns `PoolError::DisposalFailure` if the factory failed to dispose the handle.
    pub fn invalidate(&self) -> Result<(), PoolError> {
        self.inner.pool.invalidate(self)
    }

    /// Whether two handles share the same checkout.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn take(&self) -> Option<F::Handle> {
        self.inner.resource.lock().take()
    }
}

impl<F: ResourceFactory> Disposable for PooledHandle<F> {
    fn resource_id(&self) -> ResourceId {
        self.id()
    }

    fn checkout_id(&self) -> u64 {
        Self::checkout_id(self)
    }

    fn is_marked_invalid(&self) -> bool {
        Self::is_marked_invalid(self)
    }

    fn release(&self) -> Result<(), PoolError> {
        Self::release(self)
    }

    fn invalidate(&self) -> Result<(), PoolError> {
        Self::invalidate(self)
    }
}
