//! Persisted job model.
//!
//! Timestamps are epoch milliseconds (`i64`) throughout; the scheduler is
//! driven by an injectable millisecond clock and calendar math only happens
//! at the cron-evaluation boundary.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A scheduled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Stable, immutable job id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Routing hint for the host: which agent owns this job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// When/how often to run.
    pub schedule: Schedule,
    /// Whether the run lands in the shared timeline or an isolated agent turn.
    #[serde(default)]
    pub session_target: SessionTarget,
    /// Whether a main-session run triggers processing now or waits for the
    /// next heartbeat pass.
    #[serde(default)]
    pub wake_mode: WakeMode,
    /// What to run.
    pub payload: Payload,
    /// Optional plan for announcing a run's summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryPlan>,
    /// Failure alerting: absent = inherit the process-wide policy,
    /// `false` = suppressed, object = per-job override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_alert: Option<FailureAlert>,
    /// For one-shot jobs: remove the job entirely after a successful run
    /// instead of disabling it.
    #[serde(default)]
    pub delete_after_run: bool,
    /// Disabled jobs are never selected as due.
    pub enabled: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    /// Mutable run telemetry, owned exclusively by the scheduler.
    #[serde(default)]
    pub state: JobState,
}

/// How a job is scheduled to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Schedule {
    /// Fire once at a fixed timestamp.
    At { at_ms: i64 },
    /// Fire every `every_ms` milliseconds.
    Every { every_ms: i64 },
    /// Calendar schedule evaluated in `tz` (UTC when absent), with an
    /// optional random stagger window. `exact` disables the stagger.
    #[serde(rename_all = "camelCase")]
    Cron {
        expr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tz: Option<String>,
        #[serde(default)]
        stagger_ms: i64,
        #[serde(default)]
        exact: bool,
    },
}

impl Schedule {
    /// One-shot schedules reach a terminal state after a single run.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::At { .. })
    }
}

/// Where a run's output lands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionTarget {
    /// Inject into the shared conversation timeline.
    #[default]
    Main,
    /// Run as a standalone agent turn.
    Isolated,
}

/// Whether a main-session job triggers downstream processing synchronously.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WakeMode {
    #[default]
    Now,
    NextHeartbeat,
}

/// What a job does when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    /// Text injected into the conversation timeline.
    SystemEvent { text: String },
    /// A full agent turn run in isolation.
    #[serde(rename_all = "camelCase")]
    AgentTurn {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thinking: Option<String>,
    },
}

/// How a run's summary should be announced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPlan {
    pub mode: DeliveryMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub best_effort: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryMode {
    Announce,
    Webhook,
    None,
}

/// Per-job failure alerting. Serialized as `false` when suppressed so job
/// files written by the admin CLI stay terse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailureAlert {
    Toggle(bool),
    Policy(FailureAlertPolicy),
}

/// A resolved failure-alert policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAlertPolicy {
    /// Alert once `consecutive_errors` reaches this threshold.
    pub after: u32,
    /// Minimum gap between two alerts for the same job.
    pub cooldown_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Outcome class of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

/// Resolved delivery status of a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    Delivered,
    NotDelivered,
    Unknown,
    #[default]
    NotRequested,
}

/// Mutable run telemetry. The scheduler is the only writer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// Set while an execution is in flight; a job with this mark is never
    /// selected as due.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_status: Option<DeliveryStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_delivery_error: Option<String>,
    /// Consecutive failing runs; resets to 0 on any non-error outcome.
    #[serde(default)]
    pub consecutive_errors: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_alert_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
}

impl Job {
    /// Create a job with a fresh id and defaulted fields. The caller (the
    /// scheduler's add path) fills the initial `next_run_at_ms`.
    pub fn new(name: impl Into<String>, schedule: Schedule, payload: Payload, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            agent_id: None,
            schedule,
            session_target: SessionTarget::default(),
            wake_mode: WakeMode::default(),
            payload,
            delivery: None,
            failure_alert: None,
            delete_after_run: false,
            enabled: true,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            state: JobState::default(),
        }
    }

    /// The session key runs of this job are tagged with, so follow-through
    /// routes back to the originating context.
    pub fn session_key(&self) -> String {
        format!("job:{}", self.id)
    }

    /// Check whether this job is due at `now_ms`.
    ///
    /// Due means: enabled, not currently running, and `next_run_at_ms` has
    /// passed. A one-shot job that already ran is only re-selected when a
    /// retry scheduled a slot strictly after its last run, so a terminal
    /// one-shot can never re-fire off its original timestamp.
    pub fn is_due(&self, now_ms: i64) -> bool {
        if !self.enabled || self.state.running_at_ms.is_some() {
            return false;
        }
        let Some(next) = self.state.next_run_at_ms else {
            return false;
        };
        if next > now_ms {
            return false;
        }
        if self.schedule.is_one_shot()
            && let Some(last) = self.state.last_run_at_ms
        {
            return next > last;
        }
        true
    }

    /// Resolve this job's failure-alert policy against the process default.
    ///
    /// `false` suppresses alerts entirely; an object overrides the default;
    /// absent (or a stray `true`) inherits it.
    pub fn resolve_failure_alert<'a>(
        &'a self,
        default: Option<&'a FailureAlertPolicy>,
    ) -> Option<&'a FailureAlertPolicy> {
        match &self.failure_alert {
            Some(FailureAlert::Toggle(false)) => None,
            Some(FailureAlert::Policy(policy)) => Some(policy),
            Some(FailureAlert::Toggle(true)) | None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn system_event_job(schedule: Schedule) -> Job {
        Job::new(
            "test",
            schedule,
            Payload::SystemEvent {
                text: "hello".to_string(),
            },
            1_000,
        )
    }

    #[test]
    fn test_new_job_defaults() {
        let job = system_event_job(Schedule::Every { every_ms: 60_000 });
        assert!(job.enabled);
        assert!(!job.delete_after_run);
        assert_eq!(job.session_target, SessionTarget::Main);
        assert_eq!(job.wake_mode, WakeMode::Now);
        assert_eq!(job.state, JobState::default());
        assert_eq!(job.created_at_ms, 1_000);
    }

    #[test]
    fn test_is_due_requires_next_run() {
        let job = system_event_job(Schedule::Every { every_ms: 60_000 });
        assert!(!job.is_due(i64::MAX));
    }

    #[test]
    fn test_is_due_past_and_future() {
        let mut job = system_event_job(Schedule::Every { every_ms: 60_000 });
        job.state.next_run_at_ms = Some(5_000);
        assert!(!job.is_due(4_999));
        assert!(job.is_due(5_000));
        assert!(job.is_due(10_000));
    }

    #[test]
    fn test_disabled_job_never_due() {
        let mut job = system_event_job(Schedule::Every { every_ms: 60_000 });
        job.state.next_run_at_ms = Some(0);
        job.enabled = false;
        assert!(!job.is_due(10_000));
    }

    #[test]
    fn test_running_job_never_due() {
        let mut job = system_event_job(Schedule::Every { every_ms: 60_000 });
        job.state.next_run_at_ms = Some(0);
        job.state.running_at_ms = Some(1);
        assert!(!job.is_due(10_000));
    }

    #[test]
    fn test_one_shot_not_due_after_run_without_retry() {
        let mut job = system_event_job(Schedule::At { at_ms: 5_000 });
        job.state.next_run_at_ms = Some(5_000);
        job.state.last_run_at_ms = Some(6_000);
        // Original timestamp is stale relative to the last attempt.
        assert!(!job.is_due(10_000));
    }

    #[test]
    fn test_one_shot_due_when_retry_scheduled() {
        let mut job = system_event_job(Schedule::At { at_ms: 5_000 });
        job.state.last_run_at_ms = Some(6_000);
        job.state.next_run_at_ms = Some(36_000); // retry slot after the attempt
        assert!(!job.is_due(35_999));
        assert!(job.is_due(36_000));
    }

    #[test]
    fn test_resolve_failure_alert() {
        let default = FailureAlertPolicy {
            after: 3,
            cooldown_ms: 60_000,
            channel: None,
            to: None,
        };
        let mut job = system_event_job(Schedule::Every { every_ms: 1_000 });

        assert_eq!(job.resolve_failure_alert(Some(&default)), Some(&default));

        job.failure_alert = Some(FailureAlert::Toggle(false));
        assert_eq!(job.resolve_failure_alert(Some(&default)), None);

        let override_policy = FailureAlertPolicy {
            after: 1,
            cooldown_ms: 1,
            channel: Some("telegram".to_string()),
            to: Some("12345".to_string()),
        };
        job.failure_alert = Some(FailureAlert::Policy(override_policy.clone()));
        assert_eq!(
            job.resolve_failure_alert(Some(&default)),
            Some(&override_policy)
        );
        // Per-job override applies even when the process-wide policy is off.
        assert_eq!(job.resolve_failure_alert(None), Some(&override_policy));
    }

    #[test]
    fn test_failure_alert_serde_shapes() {
        let suppressed: Option<FailureAlert> = serde_json::from_str("false").unwrap();
        assert_eq!(suppressed, Some(FailureAlert::Toggle(false)));

        let policy: FailureAlert =
            serde_json::from_str(r#"{"after": 2, "cooldownMs": 60000}"#).unwrap();
        assert_eq!(
            policy,
            FailureAlert::Policy(FailureAlertPolicy {
                after: 2,
                cooldown_ms: 60_000,
                channel: None,
                to: None,
            })
        );
    }

    #[test]
    fn test_schedule_serde_tags() {
        let cron: Schedule = serde_json::from_str(
            r#"{"kind": "cron", "expr": "0 0 8 * * *", "tz": "America/New_York", "staggerMs": 30000}"#,
        )
        .unwrap();
        match cron {
            Schedule::Cron {
                expr,
                tz,
                stagger_ms,
                exact,
            } => {
                assert_eq!(expr, "0 0 8 * * *");
                assert_eq!(tz.as_deref(), Some("America/New_York"));
                assert_eq!(stagger_ms, 30_000);
                assert!(!exact);
            }
            other => panic!("expected cron schedule, got {other:?}"),
        }
    }

    proptest! {
        // A job is due iff its slot has passed, for recurring schedules.
        #[test]
        fn recurring_dueness_matches_slot(next in 0i64..1_000_000, now in 0i64..1_000_000) {
            let mut job = system_event_job(Schedule::Every { every_ms: 60_000 });
            job.state.next_run_at_ms = Some(next);
            prop_assert_eq!(job.is_due(now), next <= now);
        }

        // Serde round-trip preserves the whole record.
        #[test]
        fn job_roundtrip(
            name in ".{1,40}",
            every_ms in 1i64..86_400_000,
            enabled in proptest::bool::ANY,
            consecutive_errors in 0u32..100,
        ) {
            let mut job = system_event_job(Schedule::Every { every_ms });
            job.name = name;
            job.enabled = enabled;
            job.state.consecutive_errors = consecutive_errors;

            let json = serde_json::to_string(&job).unwrap();
            let decoded: Job = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(decoded.name, job.name);
            prop_assert_eq!(decoded.schedule, job.schedule);
            prop_assert_eq!(decoded.enabled, job.enabled);
            prop_assert_eq!(decoded.state, job.state);
        }
    }
}
