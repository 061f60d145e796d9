//! # Lifecycle Pool
//!
//! A keyed pool of expensive, reusable resources (repository sessions,
//! connections, authenticated clients) plus per-unit-of-work tracking that
//! hands every checked-out resource back when the unit of work ends.
//!
//! ## Core Problem Solved
//!
//! Creating a session per request is slow, and leaking one per request is
//! worse. The pool keeps up to `max_size` resources per [`core::PoolKey`]
//! (principal plus target), reissues idle ones, and disposes those idle for
//! longer than the refresh interval. A [`core::LifecycleRegistry`] scoped to
//! one unit of work records what was checked out so nothing outlives it.
//!
//! ## Key Features
//!
//! - **Bounded per key**: free plus in-use plus in-creation never exceeds `max_size`
//! - **Exhaustion policy**: block with a timeout (default) or fail fast
//! - **Staleness sweeps**: on demand, from a background thread, or from a tokio task
//! - **Health checks**: idle resources are validated before reuse, and
//!   `mark_dirty` retires a key's resources at once
//! - **Guaranteed cleanup**: [`runtime::UnitOfWork`] disposes its resources on drop,
//!   panics included
//! - **Observability**: `tracing` spans and events, optional event sinks, counters
//!
//! ```rust,ignore
//! use lifecycle_pool::core::PoolKey;
//! use lifecycle_pool::runtime::PoolManager;
//!
//! let mut manager = PoolManager::from_env(RepositoryFactory::connect(url)?)?;
//!
//! // Per request
//! let work = manager.begin();
//! let session = work.acquire(&PoolKey::new("editor", "preview"))?;
//! session.with(|s| s.query("/content"))??;
//! let report = work.end();
//!
//! // At process exit
//! manager.shutdown();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Pooled resources, errors and lifecycle tracking.
pub mod core;
/// Configuration models for pools and the manager.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Pool ownership, units of work and background sweeps.
pub mod runtime;
/// Shared utilities.
pub mod util;
