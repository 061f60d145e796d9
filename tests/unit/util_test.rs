//! Tests for utility functions

use std::time::Duration;

use lifecycle_pool::util::{init_tracing, init_tracing_with_default, now_ms, Clock, ManualClock, SystemClock};

#[test]
fn test_manual_clock_only_moves_when_advanced() {
    let clock = ManualClock::new();
    let start = clock.now();
    assert_eq!(clock.now(), start);
    clock.advance(Duration::from_secs(90));
    assert_eq!(clock.now() - start, Duration::from_secs(90));
}

#[test]
fn test_system_clock_advances() {
    let start = SystemClock.now();
    std::thread::sleep(Duration::from_millis(2));
    assert!(SystemClock.now() > start);
}

#[test]
fn test_now_ms_is_after_2020() {
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing_with_default("lifecycle_pool=debug");
    init_tracing();
    tracing::debug!("tracing initialised twice without panicking");
}
