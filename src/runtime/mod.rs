//! Process-level wiring: pool ownership, units of work and background sweeps.

pub mod manager;
pub mod sweeper;

pub use manager::{LifecycleHooks, PoolManager, UnitOfWork};
#[cfg(feature = "tokio-runtime")]
pub use sweeper::spawn_sweep_task;
pub use sweeper::{sweep_once, Eviction, Sweeper};
