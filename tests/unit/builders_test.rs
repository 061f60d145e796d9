//! Tests for builder modules

use lifecycle_pool::builders::{build_pool, PoolBuilder};
use lifecycle_pool::config::{ExhaustionPolicy, ManagerConfig, PoolConfig};
use lifecycle_pool::core::{PoolError, PoolKey, ResourceFactory};

struct Numbers;

impl ResourceFactory for Numbers {
    type Handle = u32;

    fn create(&self, _key: &PoolKey) -> Result<u32, PoolError> {
        Ok(7)
    }

    fn dispose(&self, _key: &PoolKey, _handle: u32) -> Result<(), PoolError> {
        Ok(())
    }
}

#[test]
fn test_pool_builder_defaults() {
    let builder = PoolBuilder::new(Numbers);
    assert_eq!(*builder.pool_config(), PoolConfig::default());
    let pool = builder.build().unwrap();
    assert_eq!(*pool.acquire(&PoolKey::new("a", "")).unwrap().access().unwrap(), 7);
}

#[test]
fn test_pool_builder_rejects_invalid_override() {
    let err = PoolBuilder::new(Numbers)
        .key_override(PoolKey::new("batch", "live"), PoolConfig::with_max_size(0))
        .build()
        .unwrap_err();
    match err {
        PoolError::InvalidConfig(msg) => assert!(msg.contains("batch@live")),
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[test]
fn test_build_pool_applies_key_overrides() {
    let cfg = ManagerConfig::from_json_str(
        r#"{
            "defaults": { "max_size": 4, "exhaustion_policy": { "kind": "fail_fast" } },
            "keys": { "batch@live": { "max_size": 1, "exhaustion_policy": { "kind": "fail_fast" } } }
        }"#,
    )
    .unwrap();
    let pool = build_pool(&cfg, Numbers).unwrap();
    let batch = PoolKey::new("batch", "live");

    let _held = pool.acquire(&batch).unwrap();
    assert!(matches!(pool.acquire(&batch), Err(PoolError::PoolExhausted { .. })));
    assert_eq!(
        cfg.defaults.exhaustion_policy,
        ExhaustionPolicy::FailFast
    );
}
