//! Lifecycle event fan-out.
//!
//! Observers subscribe through a broadcast channel; emitting with no (or
//! slow) subscribers is never an error, so observer behavior cannot affect
//! scheduling correctness.

use serde::Serialize;
use tokio::sync::broadcast;

use solstice_store::{DeliveryStatus, RunStatus};

/// Default buffered capacity per subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A job lifecycle transition.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SchedulerEvent {
    /// A run is about to start.
    #[serde(rename_all = "camelCase")]
    Started { job_id: String, name: String, at_ms: i64 },
    /// A run finished and its outcome was applied.
    #[serde(rename_all = "camelCase")]
    Finished {
        job_id: String,
        name: String,
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        delivery_status: DeliveryStatus,
        duration_ms: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_run_at_ms: Option<i64>,
    },
    /// The job was removed from the store.
    #[serde(rename_all = "camelCase")]
    Removed { job_id: String, name: String },
}

/// Best-effort fan-out of [`SchedulerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    /// Subscribe to lifecycle events. Laggy receivers miss events rather
    /// than slow the scheduler.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. A send with no live receivers is fine.
    pub fn emit(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.emit(SchedulerEvent::Removed {
            job_id: "j1".to_string(),
            name: "orphan".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(SchedulerEvent::Started {
            job_id: "j1".to_string(),
            name: "a".to_string(),
            at_ms: 1,
        });
        bus.emit(SchedulerEvent::Removed {
            job_id: "j1".to_string(),
            name: "a".to_string(),
        });

        assert!(matches!(rx.recv().await.unwrap(), SchedulerEvent::Started { .. }));
        assert!(matches!(rx.recv().await.unwrap(), SchedulerEvent::Removed { .. }));
    }
}
