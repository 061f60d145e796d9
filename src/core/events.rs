//! Pool lifecycle event sinks.
//!
//! A pool can be given a sink that records every resource transition, which is
//! handy for auditing leaks in production and for asserting disposal paths in
//! tests.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::resource::{PoolKey, ResourceId};
use crate::util::clock::now_ms;

/// Transition recorded by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEventKind {
    /// A new handle was created by the factory.
    Created,
    /// A resource was handed to a caller.
    Acquired,
    /// A resource went back to the free list.
    Released,
    /// A resource was discarded on request.
    Invalidated,
    /// A free resource was found stale by a sweep.
    Swept,
    /// The underlying handle was passed to the factory for disposal.
    Disposed,
    /// An acquire gave up because the key was at capacity.
    Exhausted,
}

/// Event structure.
#[derive(Debug, Clone)]
pub struct PoolEvent {
    /// What happened.
    pub kind: PoolEventKind,
    /// Key of the pool involved.
    pub key: PoolKey,
    /// Resource involved, absent for `Exhausted`.
    pub resource: Option<ResourceId>,
    /// Timestamp milliseconds.
    pub at_ms: u128,
}

impl PoolEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn new(kind: PoolEventKind, key: PoolKey, resource: Option<ResourceId>) -> Self {
        Self {
            kind,
            key,
            resource,
            at_ms: now_ms(),
        }
    }
}

/// Event sink abstraction.
pub trait PoolEventSink: Send {
    /// Record an event.
    fn record(&mut self, event: PoolEvent);
}

/// Bounded in-memory sink. Clones share the same buffer.
#[derive(Debug, Clone)]
pub struct InMemoryEventSink {
    events: Arc<Mutex<VecDeque<PoolEvent>>>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<PoolEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Kinds recorded for one resource, in order.
    #[must_use]
    pub fn kinds_for(&self, id: ResourceId) -> Vec<PoolEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.resource == Some(id))
            .map(|e| e.kind)
            .collect()
    }
}

impl PoolEventSink for InMemoryEventSink {
    fn record(&mut self, event: PoolEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Sink that forwards every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl PoolEventSink for TracingEventSink {
    fn record(&mut self, event: PoolEvent) {
        tracing::debug!(
            kind = ?event.kind,
            key = %event.key,
            resource = ?event.resource,
            "pool event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_sink_is_bounded() {
        let mut sink = InMemoryEventSink::new(2);
        let key = PoolKey::new("a", "");
        for raw in 0..3 {
            sink.record(PoolEvent::new(
                PoolEventKind::Created,
                key.clone(),
                Some(ResourceId::from_raw(raw)),
            ));
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].resource, Some(ResourceId::from_raw(1)));
    }

    #[test]
    fn test_clones_share_buffer() {
        let sink = InMemoryEventSink::new(8);
        let mut writer = sink.clone();
        let id = ResourceId::from_raw(4);
        writer.record(PoolEvent::new(PoolEventKind::Acquired, PoolKey::new("a", ""), Some(id)));
        writer.record(PoolEvent::new(PoolEventKind::Released, PoolKey::new("a", ""), Some(id)));
        assert_eq!(
            sink.kinds_for(id),
            vec![PoolEventKind::Acquired, PoolEventKind::Released]
        );
    }
}
