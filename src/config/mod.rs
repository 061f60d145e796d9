//! Configuration models for pools, exhaustion policy and the sweeper.

pub mod pool;

pub use pool::{ExhaustionPolicy, ManagerConfig, PoolConfig, ENV_PREFIX};
