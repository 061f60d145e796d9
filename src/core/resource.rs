//! Resource identity, state and the capabilities collaborators implement.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::PoolError;

/// Identity tuple selecting the logical pool a resource belongs to.
///
/// Two keys are equal when both the principal and the target match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    principal: String,
    target: String,
}

impl PoolKey {
    /// Build a key from a principal and a target.
    pub fn new(principal: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            target: target.into(),
        }
    }

    /// Split a combined `principal<sep>target` string at the first separator.
    ///
    /// Without a separator the whole input is the principal and the target is empty.
    ///
    /// ```
    /// use lifecycle_pool::core::PoolKey;
    ///
    /// let key = PoolKey::parse("editor@preview", "@");
    /// assert_eq!(key.principal(), "editor");
    /// assert_eq!(key.target(), "preview");
    /// assert_eq!(PoolKey::parse("admin", "@").target(), "");
    /// ```
    #[must_use]
    pub fn parse(combined: &str, separator: &str) -> Self {
        if separator.is_empty() {
            return Self::new(combined, "");
        }
        match combined.split_once(separator) {
            Some((principal, target)) => Self::new(principal, target),
            None => Self::new(combined, ""),
        }
    }

    /// Principal (user identity) part of the key.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Target (credentials domain) part of the key.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target.is_empty() {
            f.write_str(&self.principal)
        } else {
            write!(f, "{}@{}", self.principal, self.target)
        }
    }
}

/// Process-unique identifier assigned to a resource when it is created.
///
/// Ids come from one counter shared by every pool, so a registry can track
/// handles from several pools without collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(u64);

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

impl ResourceId {
    /// Allocate a fresh id.
    pub(crate) fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw id value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a pooled resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Idle in the pool, available to `acquire`.
    Free,
    /// Checked out by exactly one holder.
    InUse,
    /// Unlinked by a sweep and waiting for the factory to dispose it.
    Stale,
    /// Underlying handle released; never reissued.
    ///
    /// Reported for recently disposed resources only; the pool keeps a
    /// bounded history of them.
    Disposed,
}

/// Point-in-time description of a pooled resource.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    /// Resource identifier.
    pub id: ResourceId,
    /// Key of the owning pool.
    pub key: PoolKey,
    /// When the underlying handle was created.
    pub created_at: Instant,
    /// Last time the resource was handed out or returned; for a disposed
    /// resource, when it was disposed.
    pub last_validated_at: Instant,
    /// Current state.
    pub state: ResourceState,
}

/// Creates and destroys the expensive handles a pool manages.
///
/// The pool never inspects the handle; it only moves it between holders and
/// hands it back here for recycling, validation or disposal. Every call runs
/// outside the pool lock.
///
/// ```rust,ignore
/// struct RepositoryFactory { repo: Repository }
///
/// impl ResourceFactory for RepositoryFactory {
///     type Handle = Session;
///
///     fn create(&self, key: &PoolKey) -> Result<Session, PoolError> {
///         self.repo.login(key.principal()).map_err(|e| PoolError::Factory(e.to_string()))
///     }
///
///     fn dispose(&self, _key: &PoolKey, session: Session) -> Result<(), PoolError> {
///         session.logout().map_err(|e| PoolError::Factory(e.to_string()))
///     }
/// }
/// ```
pub trait ResourceFactory: Send + Sync + 'static {
    /// Handle type produced by this factory.
    type Handle: Send + 'static;

    /// Create a new handle for `key`.
    ///
    /// # Errors
    ///
    /// Any error is propagated to the caller of `acquire`.
    fn create(&self, key: &PoolKey) -> Result<Self::Handle, PoolError>;

    /// Release the underlying handle for good.
    ///
    /// # Errors
    ///
    /// Failures are logged by the pool; the resource is still considered disposed.
    fn dispose(&self, key: &PoolKey, handle: Self::Handle) -> Result<(), PoolError>;

    /// Reset a handle on its way back to the free list.
    ///
    /// Returning `false` discards the handle instead of reusing it.
    fn recycle(&self, _key: &PoolKey, _handle: &mut Self::Handle) -> bool {
        true
    }

    /// Check an idle handle before it is reissued.
    ///
    /// Returning `false` disposes the handle and the pool tries the next free
    /// one, creating a new handle if none is left.
    fn validate(&self, _key: &PoolKey, _handle: &Self::Handle) -> bool {
        true
    }
}

/// Capability a registry uses to end the lifetime of a tracked resource.
pub trait Disposable: Send + Sync {
    /// Identifier used for tracking.
    fn resource_id(&self) -> ResourceId;

    /// Distinguishes successive checkouts of the same resource.
    ///
    /// A registry that sees a new checkout for a tracked id replaces the old
    /// entry, since a resource has at most one live checkout. Implementations
    /// that never reissue an id can keep the default.
    fn checkout_id(&self) -> u64 {
        0
    }

    /// Whether the holder flagged the resource as broken.
    fn is_marked_invalid(&self) -> bool;

    /// Return the resource for reuse.
    ///
    /// # Errors
    ///
    /// Returns `DisposalFailure` if the pool had to discard the handle and that failed.
    fn release(&self) -> Result<(), PoolError>;

    /// Discard the resource permanently.
    ///
    /// # Errors
    ///
    /// Returns `DisposalFailure` if the underlying handle could not be released.
    fn invalidate(&self) -> Result<(), PoolError>;
}
