//! Shared factory for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use lifecycle_pool::core::{PoolError, PoolKey, ResourceFactory};

/// Stand-in for an authenticated repository session.
#[derive(Debug)]
pub struct Session {
    pub serial: u64,
    pub key: PoolKey,
    pub queries: u32,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    disposed: Mutex<Vec<u64>>,
    fail_create: AtomicBool,
    fail_dispose: AtomicBool,
    refuse_recycle: AtomicBool,
    reject_idle: AtomicBool,
    validations: AtomicU64,
}

/// Factory recording what it created and disposed. Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct TrackingFactory {
    counters: Arc<Counters>,
}

impl TrackingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> u64 {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> Vec<u64> {
        self.counters.disposed.lock().clone()
    }

    pub fn disposed_count(&self) -> usize {
        self.counters.disposed.lock().len()
    }

    pub fn fail_create(&self, fail: bool) {
        self.counters.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_dispose(&self, fail: bool) {
        self.counters.fail_dispose.store(fail, Ordering::SeqCst);
    }

    pub fn refuse_recycle(&self, refuse: bool) {
        self.counters.refuse_recycle.store(refuse, Ordering::SeqCst);
    }

    /// Fail validation of every idle session, as if the server dropped them.
    pub fn reject_idle(&self, reject: bool) {
        self.counters.reject_idle.store(reject, Ordering::SeqCst);
    }

    pub fn validations(&self) -> u64 {
        self.counters.validations.load(Ordering::SeqCst)
    }
}

impl ResourceFactory for TrackingFactory {
    type Handle = Session;

    fn create(&self, key: &PoolKey) -> Result<Session, PoolError> {
        if self.counters.fail_create.load(Ordering::SeqCst) {
            return Err(PoolError::Factory(format!("login refused for {key}")));
        }
        let serial = self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(Session {
            serial,
            key: key.clone(),
            queries: 0,
        })
    }

    fn dispose(&self, _key: &PoolKey, handle: Session) -> Result<(), PoolError> {
        self.counters.disposed.lock().push(handle.serial);
        if self.counters.fail_dispose.load(Ordering::SeqCst) {
            return Err(PoolError::Factory("logout failed".into()));
        }
        Ok(())
    }

    fn recycle(&self, _key: &PoolKey, handle: &mut Session) -> bool {
        handle.queries = 0;
        !self.counters.refuse_recycle.load(Ordering::SeqCst)
    }

    fn validate(&self, _key: &PoolKey, _handle: &Session) -> bool {
        self.counters.validations.fetch_add(1, Ordering::SeqCst);
        !self.counters.reject_idle.load(Ordering::SeqCst)
    }
}
