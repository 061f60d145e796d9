//! Error types for pool and lifecycle operations.

use std::time::Duration;

use thiserror::Error;

use crate::core::resource::{PoolKey, ResourceId};

/// Errors produced by the resource pool and the lifecycle registry.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No free resource for the key and the key is at capacity.
    #[error("pool exhausted for `{key}` after waiting {waited:?}")]
    PoolExhausted {
        /// Key whose capacity was exhausted.
        key: PoolKey,
        /// Time spent waiting before giving up.
        waited: Duration,
    },
    /// The pool has been shut down.
    #[error("pool closed")]
    PoolClosed,
    /// The factory failed to dispose the underlying handle.
    #[error("disposal of resource {id} failed: {reason}")]
    DisposalFailure {
        /// Resource whose handle could not be disposed.
        id: ResourceId,
        /// Factory-supplied reason.
        reason: String,
    },
    /// The resource is not tracked by the registry.
    #[error("unknown resource: {0}")]
    UnknownResource(ResourceId),
    /// The handle was already returned to its pool.
    #[error("resource {0} already returned to the pool")]
    AlreadyReturned(ResourceId),
    /// The factory failed to create a resource.
    #[error("factory error: {0}")]
    Factory(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (thread spawn, runtime join).
    #[error("internal error: {0}")]
    Internal(String),
}

impl PoolError {
    /// Whether the caller may retry the operation later.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. })
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
