//! Background staleness sweeps.
//!
//! The sweeper thread blocks on a stop channel with a timeout equal to the
//! sweep period, so it sleeps between sweeps and exits as soon as it is
//! stopped or its handle is dropped.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::core::{PoolError, ResourceFactory, ResourcePool};

/// Which keys a sweep may evict after disposing stale resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eviction {
    /// Never evict key bookkeeping.
    Disabled,
    /// Evict keys with no live resources whose target is listed; empty means any target.
    Targets(Vec<String>),
}

impl Eviction {
    /// Eviction policy from the manager's settings.
    #[must_use]
    pub fn from_settings(enabled: bool, targets: &[String]) -> Self {
        if enabled {
            Self::Targets(targets.to_vec())
        } else {
            Self::Disabled
        }
    }
}

/// One sweep pass: dispose stale resources, then evict idle keys.
pub fn sweep_once<F: ResourceFactory>(pool: &ResourcePool<F>, eviction: &Eviction) -> usize {
    let swept = pool.sweep();
    if let Eviction::Targets(targets) = eviction {
        pool.evict_inactive_keys(targets);
    }
    swept
}

/// Handle to a running sweeper thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Sweeper {
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    interval: Duration,
}

impl Sweeper {
    /// Start sweeping `pool` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for a zero interval and
    /// `PoolError::Internal` if the thread cannot be spawned.
    pub fn spawn<F: ResourceFactory>(
        pool: ResourcePool<F>,
        interval: Duration,
        eviction: Eviction,
    ) -> Result<Self, PoolError> {
        if interval.is_zero() {
            return Err(PoolError::InvalidConfig(
                "sweep interval must be greater than 0".into(),
            ));
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("pool-sweeper".into())
            .spawn(move || {
                debug!(interval_ms = interval.as_millis(), "sweeper thread started");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if pool.is_closed() {
                                break;
                            }
                            sweep_once(&pool, &eviction);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("sweeper thread exiting");
            })
            .map_err(|e| PoolError::Internal(format!("failed to spawn sweeper thread: {e}")))?;

        info!(interval_ms = interval.as_millis(), "sweeper started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            worker: Some(worker),
            interval,
        })
    }

    /// Sweep period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop the thread and wait for it to exit. Calling this twice is harmless.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // A send error means the thread already exited.
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("sweeper thread panicked");
            } else {
                debug!("sweeper stopped");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sweep `pool` every `interval` on the current tokio runtime.
///
/// Each sweep runs on the blocking pool since disposal calls into the factory.
/// Abort the returned task to stop sweeping.
#[cfg(feature = "tokio-runtime")]
pub fn spawn_sweep_task<F: ResourceFactory>(
    pool: ResourcePool<F>,
    interval: Duration,
    eviction: Eviction,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if pool.is_closed() {
                break;
            }
            let pool = pool.clone();
            let eviction = eviction.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || sweep_once(&pool, &eviction)).await
            {
                warn!(error = %e, "sweep task failed");
            }
        }
        debug!("sweep task exiting");
    })
}
