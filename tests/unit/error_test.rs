//! Tests for error types

use std::time::Duration;

use lifecycle_pool::core::{AppResult, PoolError, PoolKey, ResourceId};

#[test]
fn test_pool_exhausted_error() {
    let err = PoolError::PoolExhausted {
        key: PoolKey::new("editor", ""),
        waited: Duration::from_millis(5),
    };
    assert_eq!(format!("{err}"), "pool exhausted for `editor` after waiting 5ms");
    assert!(err.is_recoverable());
}

#[test]
fn test_unknown_resource_error() {
    let err = PoolError::UnknownResource(ResourceId::from_raw(3));
    assert_eq!(format!("{err}"), "unknown resource: #3");
    assert!(!err.is_recoverable());
}

#[test]
fn test_already_returned_error() {
    let err = PoolError::AlreadyReturned(ResourceId::from_raw(9));
    assert_eq!(format!("{err}"), "resource #9 already returned to the pool");
}

#[test]
fn test_config_error() {
    let err = PoolError::InvalidConfig("max_size must be greater than 0".to_string());
    assert_eq!(
        format!("{err}"),
        "invalid configuration: max_size must be greater than 0"
    );
}

#[test]
fn test_pool_error_converts_into_app_result() {
    fn fails() -> AppResult<()> {
        Err(PoolError::PoolClosed)?;
        Ok(())
    }
    let err = fails().unwrap_err();
    assert!(matches!(err.downcast_ref::<PoolError>(), Some(PoolError::PoolClosed)));
}
