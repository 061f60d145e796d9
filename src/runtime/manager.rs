//! Process-wide pool ownership and unit-of-work scoping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

use crate::builders::build_pool;
use crate::config::ManagerConfig;
use crate::core::{
    AppResult, DisposalReport, LifecycleRegistry, PoolError, PoolKey, PooledHandle,
    RegisterOutcome, ResourceFactory, ResourcePool,
};
use crate::runtime::sweeper::{Eviction, Sweeper};

/// Points in a process's life where pooled resources change hands.
///
/// The default start and end hooks implement the usual request cycle: a
/// registry is drained and activated when a unit of work begins, then drained
/// and deactivated when it ends.
pub trait LifecycleHooks {
    /// A unit of work is starting. Leftovers from a previous one are disposed.
    fn on_unit_of_work_start(&self, registry: &LifecycleRegistry) -> DisposalReport {
        let leftovers = registry.dispose_all();
        if !leftovers.is_empty() {
            warn!(count = leftovers.total(), "disposed resources left over from a previous unit of work");
        }
        registry.activate();
        leftovers
    }

    /// A unit of work finished, successfully or not.
    fn on_unit_of_work_end(&self, registry: &LifecycleRegistry) -> DisposalReport {
        let report = registry.dispose_all();
        registry.deactivate();
        report
    }

    /// The process is going down.
    fn on_process_shutdown(&self) -> DisposalReport;
}

impl<F: ResourceFactory> LifecycleHooks for ResourcePool<F> {
    fn on_process_shutdown(&self) -> DisposalReport {
        self.dispose_all()
    }
}

/// Owns the pool and its sweeper for the life of the process.
///
/// Construct one at startup and pass it (or its pool) to whatever serves
/// units of work.
pub struct PoolManager<F: ResourceFactory> {
    pool: ResourcePool<F>,
    config: ManagerConfig,
    sweeper: Option<Sweeper>,
}

impl<F: ResourceFactory> fmt::Debug for PoolManager<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("pool", &self.pool)
            .field("sweeper", &self.sweeper)
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> PoolManager<F> {
    /// Build the pool and start the sweeper if a sweep interval is configured.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::Internal` if the sweeper thread cannot be spawned
    pub fn new(factory: F, config: ManagerConfig) -> Result<Self, PoolError> {
        let pool = build_pool(&config, factory)?;
        Self::with_pool(pool, config)
    }

    /// Build a manager from `LIFECYCLE_POOL_*` environment variables.
    ///
    /// Meant for application startup, where the error only needs to be
    /// reported.
    ///
    /// # Errors
    ///
    /// Fails if the environment holds an invalid setting or the manager
    /// cannot start; the error says which step failed.
    pub fn from_env(factory: F) -> AppResult<Self> {
        let config = ManagerConfig::from_env()
            .map_err(anyhow::Error::msg)
            .context("loading pool configuration from the environment")?;
        Self::new(factory, config).context("starting pool manager")
    }

    /// Manage an already built pool.
    ///
    /// # Errors
    ///
    /// Same as [`PoolManager::new`].
    pub fn with_pool(pool: ResourcePool<F>, config: ManagerConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let sweeper = config
            .sweep_interval()
            .map(|interval| {
                Sweeper::spawn(
                    pool.clone(),
                    interval,
                    Eviction::from_settings(config.evict_inactive_keys, &config.evictable_targets),
                )
            })
            .transpose()?;
        info!(
            sweeper = sweeper.is_some(),
            always_active = config.lifecycle_always_active,
            "pool manager started"
        );
        Ok(Self {
            pool,
            config,
            sweeper,
        })
    }

    /// The managed pool.
    #[must_use]
    pub const fn pool(&self) -> &ResourcePool<F> {
        &self.pool
    }

    /// Configuration the manager was built with.
    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Whether a background sweeper is running.
    #[must_use]
    pub fn has_sweeper(&self) -> bool {
        self.sweeper.as_ref().is_some_and(Sweeper::is_running)
    }

    /// Start a unit of work with a fresh registry.
    #[must_use]
    pub fn begin(&self) -> UnitOfWork<F> {
        let registry = if self.config.lifecycle_always_active {
            LifecycleRegistry::always_active()
        } else {
            LifecycleRegistry::new()
        };
        UnitOfWork::start(self.pool.clone(), Arc::new(registry))
    }

    /// Start a unit of work on an existing registry, disposing its leftovers.
    #[must_use]
    pub fn begin_with(&self, registry: Arc<LifecycleRegistry>) -> UnitOfWork<F> {
        UnitOfWork::start(self.pool.clone(), registry)
    }

    /// Stop the sweeper and close the pool.
    pub fn shutdown(&mut self) -> DisposalReport {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        let report = self.on_process_shutdown();
        info!(
            disposed = report.disposed.len(),
            failures = report.failures.len(),
            "pool manager shut down"
        );
        report
    }
}

impl<F: ResourceFactory> LifecycleHooks for PoolManager<F> {
    fn on_process_shutdown(&self) -> DisposalReport {
        self.pool.on_process_shutdown()
    }
}

/// Scope of one unit of work.
///
/// Everything acquired through it is registered and handed back when the
/// unit of work ends, either through [`UnitOfWork::end`] or on drop, which
/// also covers early returns and panics.
pub struct UnitOfWork<F: ResourceFactory> {
    id: Uuid,
    pool: ResourcePool<F>,
    registry: Arc<LifecycleRegistry>,
    span: Span,
    finished: bool,
}

impl<F: ResourceFactory> fmt::Debug for UnitOfWork<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("registry", &self.registry)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<F: ResourceFactory> UnitOfWork<F> {
    fn start(pool: ResourcePool<F>, registry: Arc<LifecycleRegistry>) -> Self {
        let id = Uuid::new_v4();
        let span = info_span!("unit_of_work", id = %id);
        {
            let _entered = span.enter();
            pool.on_unit_of_work_start(&registry);
            debug!("unit of work started");
        }
        Self {
            id,
            pool,
            registry,
            span,
            finished: false,
        }
    }

    /// Unit-of-work identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Registry tracking this unit of work's resources.
    #[must_use]
    pub fn registry(&self) -> &Arc<LifecycleRegistry> {
        &self.registry
    }

    /// Pool the unit of work acquires from.
    #[must_use]
    pub const fn pool(&self) -> &ResourcePool<F> {
        &self.pool
    }

    /// Acquire and register a resource.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire`].
    pub fn acquire(&self, key: &PoolKey) -> Result<PooledHandle<F>, PoolError> {
        let handle = {
            let _entered = self.span.enter();
            self.pool.acquire(key)?
        };
        Ok(self.track(handle))
    }

    /// Acquire and register a resource, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire_timeout`].
    pub fn acquire_timeout(
        &self,
        key: &PoolKey,
        timeout: Duration,
    ) -> Result<PooledHandle<F>, PoolError> {
        let handle = {
            let _entered = self.span.enter();
            self.pool.acquire_timeout(key, timeout)?
        };
        Ok(self.track(handle))
    }

    /// Acquire and register a resource from an async context.
    ///
    /// # Errors
    ///
    /// Same as [`ResourcePool::acquire_async`].
    #[cfg(feature = "tokio-runtime")]
    pub async fn acquire_async(&self, key: &PoolKey) -> Result<PooledHandle<F>, PoolError> {
        let handle = self.pool.acquire_async(key).await?;
        Ok(self.track(handle))
    }

    fn track(&self, handle: PooledHandle<F>) -> PooledHandle<F> {
        if self.registry.register(Arc::new(handle.clone())) == RegisterOutcome::Inactive {
            debug!(parent: &self.span, resource = %handle.id(), "acquired outside an active registry");
        }
        handle
    }

    /// End the unit of work, handing back every registered resource.
    pub fn end(mut self) -> DisposalReport {
        self.finish()
    }

    fn finish(&mut self) -> DisposalReport {
        if self.finished {
            return DisposalReport::default();
        }
        self.finished = true;
        let _entered = self.span.enter();
        let report = self.pool.on_unit_of_work_end(&self.registry);
        debug!(
            released = report.released.len(),
            disposed = report.disposed.len(),
            failures = report.failures.len(),
            "unit of work ended"
        );
        report
    }
}

impl<F: ResourceFactory> Drop for UnitOfWork<F> {
    fn drop(&mut self) {
        if !self.finished {
            if std::thread::panicking() {
                warn!(parent: &self.span, "unit of work unwinding, disposing its resources");
            }
            self.finish();
        }
    }
}
