//! Builders to construct resource pools from configuration.

pub mod pool_builder;

pub use pool_builder::{build_pool, PoolBuilder};
