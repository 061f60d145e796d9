//! Pooled resources, their errors and per-unit-of-work lifecycle tracking.

pub mod error;
pub mod events;
pub mod lifecycle;
pub mod resource;
pub mod resource_pool;

pub use error::{AppResult, PoolError};
pub use events::{InMemoryEventSink, PoolEvent, PoolEventKind, PoolEventSink, TracingEventSink};
pub use lifecycle::{DisposalReport, LifecycleRegistry, RegisterOutcome};
pub use resource::{Disposable, PoolKey, ResourceFactory, ResourceId, ResourceInfo, ResourceState};
pub use resource_pool::{PoolStats, PooledHandle, ResourcePool};
