//! Per-unit-of-work tracking of checked-out resources.
//!
//! A [`LifecycleRegistry`] belongs to exactly one unit of work (one inbound
//! request, one job). Resources acquired while it is active are registered,
//! and [`LifecycleRegistry::dispose_all`] at the end of the unit of work hands
//! every one of them back: released for reuse, or invalidated if the holder
//! flagged it as broken. Each resource is disposed at most once.
//!
//! The registry is internally locked so a unit of work that fans out to
//! several threads can share it behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::resource::{Disposable, ResourceId};
use crate::core::PoolError;

/// Result of [`LifecycleRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The resource is now tracked.
    Registered,
    /// The same checkout was already tracked; nothing changed.
    AlreadyTracked,
    /// The registry is inactive; the resource is not tracked.
    Inactive,
}

/// What a bulk disposal did.
#[derive(Debug, Default)]
pub struct DisposalReport {
    /// Resources returned to their pool for reuse.
    pub released: Vec<ResourceId>,
    /// Resources disposed for good.
    pub disposed: Vec<ResourceId>,
    /// Disposals that failed; the resources are gone regardless.
    pub failures: Vec<PoolError>,
}

impl DisposalReport {
    /// Total number of resources handled, failures included.
    #[must_use]
    pub fn total(&self) -> usize {
        self.released.len() + self.disposed.len() + self.failures.len()
    }

    /// Whether nothing was disposed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Whether every disposal succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.released.extend(other.released);
        self.disposed.extend(other.disposed);
        self.failures.extend(other.failures);
    }
}

#[derive(Default)]
struct RegistryState {
    active: bool,
    tracked: BTreeMap<ResourceId, Arc<dyn Disposable>>,
}

/// Tracks the resources checked out during one unit of work.
pub struct LifecycleRegistry {
    state: Mutex<RegistryState>,
    always_active: bool,
}

impl fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LifecycleRegistry")
            .field("active", &state.active)
            .field("always_active", &self.always_active)
            .field("tracked", &state.tracked.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleRegistry {
    /// Create an inactive registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            always_active: false,
        }
    }

    /// Create a registry that tracks registrations even while deactivated.
    #[must_use]
    pub fn always_active() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            always_active: true,
        }
    }

    /// Whether registrations currently take effect.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.always_active || self.state.lock().active
    }

    /// Whether this registry ignores deactivation.
    #[must_use]
    pub const fn is_always_active(&self) -> bool {
        self.always_active
    }

    /// Start tracking registrations.
    pub fn activate(&self) {
        self.set_active(true);
    }

    /// Stop tracking registrations. Already tracked resources stay tracked.
    pub fn deactivate(&self) {
        self.set_active(false);
    }

    /// Turn tracking on or off.
    pub fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    /// Track `resource` if the registry is active.
    ///
    /// A resource that was released and reissued within the same unit of work
    /// comes back under its old id with a new checkout; the new checkout
    /// replaces the returned one.
    pub fn register(&self, resource: Arc<dyn Disposable>) -> RegisterOutcome {
        let id = resource.resource_id();
        let mut state = self.state.lock();
        if !(self.always_active || state.active) {
            debug!(resource = %id, "registry inactive, resource not tracked");
            return RegisterOutcome::Inactive;
        }
        if let Some(existing) = state.tracked.get(&id) {
            if existing.checkout_id() == resource.checkout_id() {
                return RegisterOutcome::AlreadyTracked;
            }
            debug!(resource = %id, "resource reissued, tracking the new checkout");
        }
        state.tracked.insert(id, resource);
        RegisterOutcome::Registered
    }

    /// Stop tracking a resource without disposing it.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::UnknownResource` if `id` is not tracked.
    pub fn unregister(&self, id: ResourceId) -> Result<(), PoolError> {
        match self.state.lock().tracked.remove(&id) {
            Some(_) => Ok(()),
            None => {
                warn!(resource = %id, "unregister of untracked resource");
                Err(PoolError::UnknownResource(id))
            }
        }
    }

    /// Whether `id` is tracked.
    #[must_use]
    pub fn is_tracked(&self, id: ResourceId) -> bool {
        self.state.lock().tracked.contains_key(&id)
    }

    /// Number of tracked resources.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.state.lock().tracked.len()
    }

    /// Dispose one tracked resource and stop tracking it.
    ///
    /// # Errors
    ///
    /// - `PoolError::UnknownResource` if `id` is not tracked
    /// - `PoolError::DisposalFailure` if the resource's pool failed to dispose it
    pub fn dispose_resource(&self, id: ResourceId) -> Result<(), PoolError> {
        let resource = self
            .state
            .lock()
            .tracked
            .remove(&id)
            .ok_or(PoolError::UnknownResource(id))?;
        dispose(resource.as_ref()).map(|_| ())
    }

    /// Dispose every tracked resource and clear the set.
    ///
    /// Every resource is attempted even if earlier ones fail; failures are
    /// logged and collected in the report. Calling this again disposes nothing.
    pub fn dispose_all(&self) -> DisposalReport {
        let tracked = std::mem::take(&mut self.state.lock().tracked);
        let mut report = DisposalReport::default();
        for (id, resource) in tracked {
            match dispose(resource.as_ref()) {
                Ok(Disposal::Released) => report.released.push(id),
                Ok(Disposal::Invalidated) => report.disposed.push(id),
                Err(e) => {
                    warn!(resource = %id, error = %e, "disposal failed during dispose_all");
                    report.failures.push(e);
                }
            }
        }
        if !report.is_empty() {
            debug!(
                released = report.released.len(),
                disposed = report.disposed.len(),
                failures = report.failures.len(),
                "registry drained"
            );
        }
        report
    }

    /// Visit tracked resources in id order until `visitor` breaks.
    ///
    /// The visitor runs on a snapshot, so it may register or dispose resources.
    pub fn visit_resources<B>(
        &self,
        mut visitor: impl FnMut(&dyn Disposable) -> ControlFlow<B>,
    ) -> Option<B> {
        let snapshot: Vec<Arc<dyn Disposable>> =
            self.state.lock().tracked.values().cloned().collect();
        snapshot
            .iter()
            .find_map(|resource| match visitor(resource.as_ref()) {
                ControlFlow::Break(value) => Some(value),
                ControlFlow::Continue(()) => None,
            })
    }
}

enum Disposal {
    Released,
    Invalidated,
}

fn dispose(resource: &dyn Disposable) -> Result<Disposal, PoolError> {
    if resource.is_marked_invalid() {
        resource.invalidate().map(|()| Disposal::Invalidated)
    } else {
        resource.release().map(|()| Disposal::Released)
    }
}
