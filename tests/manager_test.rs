//! Integration tests for PoolManager, UnitOfWork and background sweeps.

mod support;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lifecycle_pool::builders::PoolBuilder;
use lifecycle_pool::config::{ExhaustionPolicy, ManagerConfig, PoolConfig};
use lifecycle_pool::core::{LifecycleRegistry, PoolError, PoolKey, ResourcePool};
use lifecycle_pool::runtime::{
    spawn_sweep_task, sweep_once, Eviction, LifecycleHooks, PoolManager, Sweeper,
};
use lifecycle_pool::util::ManualClock;

use support::TrackingFactory;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn key() -> PoolKey {
    PoolKey::new("editor", "live")
}

fn config(max_size: usize) -> ManagerConfig {
    ManagerConfig {
        defaults: PoolConfig::with_max_size(max_size).exhaustion(ExhaustionPolicy::FailFast),
        ..ManagerConfig::default()
    }
}

fn clocked_pool(factory: &TrackingFactory) -> (ResourcePool<TrackingFactory>, ManualClock) {
    let clock = ManualClock::new();
    let pool = PoolBuilder::new(factory.clone())
        .config(PoolConfig::with_max_size(2).refresh_minutes(1))
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    (pool, clock)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

#[test]
fn test_end_returns_everything_acquired() {
    let manager = PoolManager::new(TrackingFactory::new(), config(2)).unwrap();
    let work = manager.begin();
    let a = work.acquire(&key()).unwrap();
    let b = work.acquire(&key()).unwrap();
    assert_eq!(work.registry().tracked_count(), 2);

    let report = work.end();
    assert_eq!(report.released, vec![a.id(), b.id()]);
    assert_eq!(manager.pool().key_stats(&key()).unwrap().idle, 2);
}

#[test]
fn test_drop_returns_resources() {
    let manager = PoolManager::new(TrackingFactory::new(), config(1)).unwrap();
    {
        let work = manager.begin();
        let _session = work.acquire(&key()).unwrap();
    }
    let stats = manager.pool().stats();
    assert_eq!(stats.active, 0);
    assert_eq!(stats.idle, 1);
}

#[test]
fn test_panicking_unit_of_work_still_cleans_up() {
    let factory = TrackingFactory::new();
    let manager = PoolManager::new(factory.clone(), config(1)).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let work = manager.begin();
        let session = work.acquire(&key()).unwrap();
        session.mark_invalid();
        panic!("request handler failed");
    }));
    assert!(result.is_err());

    assert_eq!(manager.pool().stats().active, 0);
    assert_eq!(factory.disposed(), vec![0]);
    assert!(manager.pool().acquire(&key()).is_ok());
}

#[test]
fn test_resource_released_early_and_reacquired_is_returned_at_end() {
    let manager = PoolManager::new(TrackingFactory::new(), config(1)).unwrap();
    let work = manager.begin();
    let first = work.acquire(&key()).unwrap();
    first.release().unwrap();

    let second = work.acquire(&key()).unwrap();
    assert_eq!(second.id(), first.id());
    assert_ne!(second.checkout_id(), first.checkout_id());
    assert_eq!(work.registry().tracked_count(), 1);

    let report = work.end();
    assert_eq!(report.released, vec![second.id()]);
    assert!(second.is_returned());
    assert_eq!(manager.pool().stats().active, 0);
}

#[test]
fn test_invalid_mark_on_reacquired_resource_is_honored() {
    let factory = TrackingFactory::new();
    let manager = PoolManager::new(factory.clone(), config(1)).unwrap();
    let work = manager.begin();
    work.acquire(&key()).unwrap().release().unwrap();

    let second = work.acquire(&key()).unwrap();
    second.mark_invalid();
    let report = work.end();

    assert_eq!(report.disposed, vec![second.id()]);
    assert_eq!(factory.disposed(), vec![0]);
    assert!(manager.pool().free_ids(&key()).is_empty());
}

#[test]
fn test_units_of_work_have_distinct_ids() {
    let manager = PoolManager::new(TrackingFactory::new(), config(1)).unwrap();
    let first = manager.begin();
    let second = manager.begin();
    assert_ne!(first.id(), second.id());
}

#[test]
fn test_acquire_timeout_through_unit_of_work() {
    let manager = PoolManager::new(TrackingFactory::new(), config(1)).unwrap();
    let work = manager.begin();
    let _held = work.acquire(&key()).unwrap();
    assert!(matches!(
        work.acquire_timeout(&key(), Duration::from_millis(20)),
        Err(PoolError::PoolExhausted { .. })
    ));
    assert_eq!(work.registry().tracked_count(), 1);
}

#[test]
fn test_begin_with_disposes_leftovers() {
    let manager = PoolManager::new(TrackingFactory::new(), config(1)).unwrap();
    let registry = Arc::new(LifecycleRegistry::new());
    registry.activate();
    let stale = manager.pool().acquire(&key()).unwrap();
    registry.register(Arc::new(stale.clone()));

    let work = manager.begin_with(Arc::clone(&registry));
    assert!(stale.is_returned());
    assert!(work.registry().is_active());
    assert_eq!(registry.tracked_count(), 0);
}

#[test]
fn test_always_active_registry_tracks_after_deactivate() {
    let manager = PoolManager::new(
        TrackingFactory::new(),
        ManagerConfig {
            lifecycle_always_active: true,
            ..config(1)
        },
    )
    .unwrap();
    let work = manager.begin();
    work.registry().deactivate();
    let session = work.acquire(&key()).unwrap();
    assert!(work.registry().is_tracked(session.id()));
}

// ============================================================================
// HOOKS AND SHUTDOWN
// ============================================================================

#[test]
fn test_hooks_drive_registry_state() {
    let manager = PoolManager::new(TrackingFactory::new(), config(1)).unwrap();
    let registry = LifecycleRegistry::new();

    assert!(manager.on_unit_of_work_start(&registry).is_empty());
    assert!(registry.is_active());
    registry.register(Arc::new(manager.pool().acquire(&key()).unwrap()));

    let report = manager.on_unit_of_work_end(&registry);
    assert_eq!(report.released.len(), 1);
    assert!(!registry.is_active());
}

#[test]
fn test_shutdown_stops_sweeper_and_closes_pool() {
    let factory = TrackingFactory::new();
    let mut manager = PoolManager::new(
        factory.clone(),
        ManagerConfig {
            sweep_interval_secs: Some(60),
            ..config(2)
        },
    )
    .unwrap();
    assert!(manager.has_sweeper());
    manager.pool().acquire(&key()).unwrap().release().unwrap();

    let report = manager.shutdown();
    assert_eq!(report.disposed.len(), 1);
    assert!(!manager.has_sweeper());
    assert!(manager.pool().is_closed());
    assert!(matches!(
        manager.begin().acquire(&key()),
        Err(PoolError::PoolClosed)
    ));
}

#[test]
fn test_invalid_config_is_rejected() {
    let err = PoolManager::new(TrackingFactory::new(), config(0)).unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[test]
fn test_from_env_builds_manager_with_defaults() {
    let manager = PoolManager::from_env(TrackingFactory::new()).unwrap();
    assert_eq!(manager.config().defaults, PoolConfig::default());
    assert!(!manager.has_sweeper());
    assert!(manager.begin().acquire(&key()).is_ok());
}

// ============================================================================
// SWEEPS
// ============================================================================

#[test]
fn test_sweep_once_evicts_idle_keys() {
    let factory = TrackingFactory::new();
    let (pool, clock) = clocked_pool(&factory);
    pool.acquire(&key()).unwrap().release().unwrap();

    clock.advance(Duration::from_secs(120));
    assert_eq!(sweep_once(&pool, &Eviction::Disabled), 1);
    assert_eq!(pool.keys().len(), 1);

    assert_eq!(sweep_once(&pool, &Eviction::from_settings(true, &[])), 0);
    assert!(pool.keys().is_empty());
}

#[test]
fn test_sweeper_thread_disposes_stale_resources() {
    let factory = TrackingFactory::new();
    let (pool, clock) = clocked_pool(&factory);
    pool.acquire(&key()).unwrap().release().unwrap();

    let mut sweeper =
        Sweeper::spawn(pool.clone(), Duration::from_millis(10), Eviction::Disabled).unwrap();
    assert!(sweeper.is_running());
    clock.advance(Duration::from_secs(120));

    assert!(wait_until(Duration::from_secs(5), || factory.disposed_count() == 1));
    sweeper.stop();
    assert!(!sweeper.is_running());
    sweeper.stop();
}

#[test]
fn test_zero_sweep_interval_is_rejected() {
    let (pool, _clock) = clocked_pool(&TrackingFactory::new());
    assert!(matches!(
        Sweeper::spawn(pool, Duration::ZERO, Eviction::Disabled),
        Err(PoolError::InvalidConfig(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweep_task_disposes_stale_resources() {
    let factory = TrackingFactory::new();
    let (pool, clock) = clocked_pool(&factory);
    pool.acquire(&key()).unwrap().release().unwrap();

    let task = spawn_sweep_task(pool.clone(), Duration::from_millis(10), Eviction::Disabled);
    clock.advance(Duration::from_secs(120));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while factory.disposed_count() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(factory.disposed_count(), 1);
    task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unit_of_work_acquire_async() {
    let manager = PoolManager::new(TrackingFactory::new(), config(1)).unwrap();
    let work = manager.begin();
    let session = work.acquire_async(&key()).await.unwrap();
    assert!(work.registry().is_tracked(session.id()));
    let report = work.end();
    assert_eq!(report.released, vec![session.id()]);
}
