//! Builders to construct resource pools from configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{ManagerConfig, PoolConfig};
use crate::core::{PoolError, PoolEventSink, PoolKey, ResourceFactory, ResourcePool};
use crate::util::clock::{Clock, SystemClock};

/// Step-by-step construction of a [`ResourcePool`].
///
/// ```rust,ignore
/// let pool = PoolBuilder::new(factory)
///     .config(PoolConfig::with_max_size(4))
///     .key_override(PoolKey::new("batch", "live"), PoolConfig::with_max_size(1))
///     .event_sink(Box::new(TracingEventSink))
///     .build()?;
/// ```
pub struct PoolBuilder<F: ResourceFactory> {
    factory: F,
    config: PoolConfig,
    overrides: HashMap<PoolKey, PoolConfig>,
    clock: Arc<dyn Clock>,
    events: Option<Box<dyn PoolEventSink>>,
}

impl<F: ResourceFactory> fmt::Debug for PoolBuilder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("config", &self.config)
            .field("overrides", &self.overrides)
            .field("clock", &self.clock)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> PoolBuilder<F> {
    /// Start from default configuration and the system clock.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            config: PoolConfig::default(),
            overrides: HashMap::new(),
            clock: Arc::new(SystemClock),
            events: None,
        }
    }

    /// Configuration applied to keys without an override.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Current default configuration.
    #[must_use]
    pub const fn pool_config(&self) -> &PoolConfig {
        &self.config
    }

    /// Configuration for one key.
    #[must_use]
    pub fn key_override(mut self, key: PoolKey, config: PoolConfig) -> Self {
        self.overrides.insert(key, config);
        self
    }

    /// Take defaults and per-key overrides from a manager configuration.
    #[must_use]
    pub fn overrides_from(mut self, cfg: &ManagerConfig) -> Self {
        self.config = cfg.defaults;
        self.overrides.extend(cfg.key_overrides());
        self
    }

    /// Time source for staleness checks.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record every resource transition in `sink`.
    #[must_use]
    pub fn event_sink(mut self, sink: Box<dyn PoolEventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Validate the configuration and build the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` naming the first invalid setting.
    pub fn build(self) -> Result<ResourcePool<F>, PoolError> {
        self.config
            .validate()
            .map_err(|e| PoolError::InvalidConfig(format!("defaults invalid: {e}")))?;
        for (key, cfg) in &self.overrides {
            cfg.validate()
                .map_err(|e| PoolError::InvalidConfig(format!("pool `{key}` invalid: {e}")))?;
        }
        Ok(ResourcePool::from_parts(
            self.factory,
            self.config,
            self.overrides,
            self.clock,
            self.events,
        ))
    }
}

/// Build a pool from manager configuration.
///
/// # Errors
///
/// Returns `PoolError::InvalidConfig` if the configuration does not validate.
pub fn build_pool<F: ResourceFactory>(
    cfg: &ManagerConfig,
    factory: F,
) -> Result<ResourcePool<F>, PoolError> {
    cfg.validate()
        .map_err(|e| PoolError::InvalidConfig(format!("config invalid: {e}")))?;
    PoolBuilder::new(factory).overrides_from(cfg).build()
}
