//! Collaborator contracts the scheduler core consumes.
//!
//! The actual work a job performs lives in the host application: injecting
//! text into a conversation timeline, running heartbeat passes, executing
//! isolated agent turns, delivering alerts. The scheduler only needs these
//! narrow seams, plus an injectable clock so tests are deterministic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use solstice_store::{DeliveryMode, Job, RunStatus};

use crate::error::HostError;

/// Context attached to a timeline injection.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    pub agent_id: Option<String>,
    pub session_key: Option<String>,
    pub context_key: Option<String>,
}

/// A heartbeat trigger request.
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub reason: String,
    pub agent_id: Option<String>,
    pub session_key: Option<String>,
}

/// Result of a synchronous heartbeat attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Ran,
    /// The runner declined; `reason` says why (e.g. "requests-in-flight").
    Skipped { reason: Option<String> },
    Error { reason: Option<String> },
}

impl HeartbeatOutcome {
    /// Whether the attempt should be retried after a short wait.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            HeartbeatOutcome::Skipped { reason: Some(r) } if r == "requests-in-flight"
        )
    }
}

/// Report from an isolated agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunReport {
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered: Option<bool>,
    #[serde(default)]
    pub delivery_attempted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
}

/// A failure alert ready for delivery.
#[derive(Debug, Clone)]
pub struct FailureAlertMessage {
    pub job_id: String,
    pub job_name: String,
    pub text: String,
    pub channel: Option<String>,
    pub to: Option<String>,
}

/// Whether a job's delivery plan asks for an announcement.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryResolution {
    pub requested: bool,
}

/// Host collaborator seams.
///
/// Default implementations make every hook optional except the two
/// execution paths a host actually wants to serve.
#[async_trait]
pub trait HostHooks: Send + Sync {
    /// Inject text into the shared conversation timeline.
    async fn enqueue_system_event(&self, text: &str, ctx: &EventContext) -> Result<(), HostError>;

    /// Fire-and-forget request for a heartbeat pass.
    async fn request_heartbeat_now(&self, req: &HeartbeatRequest) -> Result<(), HostError>;

    /// Attempt a heartbeat pass synchronously. May report busy.
    async fn run_heartbeat_once(
        &self,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatOutcome, HostError>;

    /// Execute a job as a standalone agent turn. The token is cooperative
    /// cancellation; the body should select on it, not expect preemption.
    async fn run_isolated_job(
        &self,
        job: &Job,
        message: &str,
        cancel: CancellationToken,
    ) -> Result<AgentRunReport, HostError>;

    /// Deliver a failure alert through a dedicated channel. Hosts without
    /// one keep the default; the scheduler then falls back to a timeline
    /// injection plus a heartbeat request.
    async fn send_failure_alert(&self, _alert: &FailureAlertMessage) -> Result<(), HostError> {
        Err(HostError::Unsupported)
    }

    /// Whether a run's summary is expected to be announced somewhere.
    fn resolve_delivery_plan(&self, job: &Job) -> DeliveryResolution {
        let requested = job
            .delivery
            .as_ref()
            .is_some_and(|d| d.mode != DeliveryMode::None);
        DeliveryResolution { requested }
    }

    /// Piggybacked session cleanup, throttled by the engine. Returns the
    /// number of sessions reaped.
    async fn sweep_sessions(&self) -> Result<usize, HostError> {
        Ok(0)
    }
}

/// Injectable millisecond clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}
