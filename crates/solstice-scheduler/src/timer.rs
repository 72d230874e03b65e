//! Single-handle wake timer.
//!
//! The scheduler owns exactly one pending wake at a time. Re-arming aborts
//! the previous sleep and replaces it, so there is never more than one
//! timer task alive, and the engine re-arms from exactly one place after
//! any job-state change.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Owns the one pending wake-up task.
#[derive(Debug, Default)]
pub(crate) struct WakeTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any pending wake with a new one that runs `fire` after
    /// `delay`.
    pub fn arm<F>(&self, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = slot.take() {
            prev.abort();
        }
        trace!(delay_ms = delay.as_millis() as u64, "arming wake timer");
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        }));
    }

    /// Cancel the pending wake, if any.
    pub fn disarm(&self) {
        let mut slot = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = slot.take() {
            prev.abort();
            trace!("disarmed wake timer");
        }
    }

    /// Whether a wake is currently pending (or mid-fire).
    pub fn is_armed(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for WakeTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}
