//! Tests for configuration validation

use std::collections::HashMap;
use std::time::Duration;

use lifecycle_pool::config::{ExhaustionPolicy, ManagerConfig, PoolConfig};
use lifecycle_pool::core::PoolKey;

fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn test_pool_config_validation() {
    assert!(PoolConfig::default().validate().is_ok());
    assert!(PoolConfig::with_max_size(0).validate().is_err());
    assert!(PoolConfig::with_max_size(1).refresh_minutes(0).validate().is_err());
    assert!(PoolConfig::with_max_size(1)
        .exhaustion(ExhaustionPolicy::BlockWithTimeout { timeout_ms: 0 })
        .validate()
        .is_err());
}

#[test]
fn test_pool_config_defaults() {
    let cfg = PoolConfig::default();
    assert_eq!(cfg.max_size, 16);
    assert_eq!(cfg.refresh_interval(), Duration::from_secs(300));
    assert_eq!(cfg.exhaustion_policy.wait(), Some(Duration::from_secs(30)));
}

#[test]
fn test_manager_config_from_json() {
    let cfg = ManagerConfig::from_json_str(
        r#"{
            "defaults": { "max_size": 2, "refresh_interval_minutes": 10 },
            "keys": { "batch|live": { "max_size": 1 } },
            "key_separator": "|",
            "sweep_interval_secs": 30
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.defaults.max_size, 2);
    assert_eq!(cfg.sweep_interval(), Some(Duration::from_secs(30)));
    let overrides = cfg.key_overrides();
    assert_eq!(overrides[&PoolKey::new("batch", "live")].max_size, 1);
}

#[test]
fn test_manager_config_invalid_override() {
    let err = ManagerConfig::from_json_str(r#"{ "keys": { "a@b": { "max_size": 0 } } }"#)
        .unwrap_err();
    assert!(err.contains("pool `a@b` invalid"));
}

#[test]
fn test_manager_config_parse_error() {
    assert!(ManagerConfig::from_json_str("{ not json").unwrap_err().starts_with("parse error"));
}

#[test]
fn test_properties_are_trimmed() {
    let cfg = ManagerConfig::from_properties(&props(&[
        ("max_size", " 4 "),
        ("refresh_interval_minutes", "10"),
        ("lifecycle_always_active", "true "),
        ("evict_inactive_keys", " false"),
        ("evictable_targets", "live, preview ,"),
        ("exhaustion_policy", "fail_fast"),
    ]))
    .unwrap();
    assert_eq!(cfg.defaults.max_size, 4);
    assert_eq!(cfg.defaults.refresh_interval_minutes, 10);
    assert!(cfg.lifecycle_always_active);
    assert!(!cfg.evict_inactive_keys);
    assert_eq!(cfg.evictable_targets, vec!["live", "preview"]);
    assert_eq!(cfg.defaults.exhaustion_policy, ExhaustionPolicy::FailFast);
}

#[test]
fn test_properties_acquire_timeout() {
    let cfg = ManagerConfig::from_properties(&props(&[("acquire_timeout_ms", "250")])).unwrap();
    assert_eq!(
        cfg.defaults.exhaustion_policy,
        ExhaustionPolicy::BlockWithTimeout { timeout_ms: 250 }
    );
}

#[test]
fn test_properties_reject_bad_values() {
    let err = ManagerConfig::from_properties(&props(&[("max_size", "lots")])).unwrap_err();
    assert!(err.starts_with("max_size: cannot parse `lots`"));
    assert!(ManagerConfig::from_properties(&props(&[("exhaustion_policy", "queue")])).is_err());
    assert!(ManagerConfig::from_properties(&props(&[("max_size", "0")])).is_err());
}

#[test]
fn test_policy_serde_shape() {
    let json = serde_json::to_string(&ExhaustionPolicy::BlockWithTimeout { timeout_ms: 10 }).unwrap();
    assert_eq!(json, r#"{"kind":"block_with_timeout","timeout_ms":10}"#);
}

#[test]
fn test_manager_config_from_env() {
    std::env::set_var("LIFECYCLE_POOL_MAX_SIZE", " 6 ");
    std::env::set_var("LIFECYCLE_POOL_EXHAUSTION_POLICY", "fail_fast");
    let cfg = ManagerConfig::from_env();
    std::env::remove_var("LIFECYCLE_POOL_MAX_SIZE");
    std::env::remove_var("LIFECYCLE_POOL_EXHAUSTION_POLICY");

    let cfg = cfg.unwrap();
    assert_eq!(cfg.defaults.max_size, 6);
    assert_eq!(cfg.defaults.exhaustion_policy, ExhaustionPolicy::FailFast);
}
