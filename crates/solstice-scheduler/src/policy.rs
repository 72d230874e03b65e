//! Result & retry policy.
//!
//! Turns one run outcome into updated job state: telemetry, delivery-status
//! resolution, consecutive-error tracking, failure-alert gating, one-shot
//! lifecycle transitions, and retry/backoff scheduling. Pure with respect
//! to time (callers pass the clock reading), so every path is testable
//! without sleeping.

use tracing::{debug, warn};

use solstice_store::{DeliveryStatus, Job, RunStatus};

use crate::config::SchedulerConfig;
use crate::host::FailureAlertMessage;
use crate::retry::ErrorClassifier;
use crate::schedule::next_run_with_floor;

/// Maximum characters of error text carried into an alert.
const ALERT_ERROR_MAX_CHARS: usize = 200;

/// Structured outcome of a single run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub error: Option<String>,
    pub summary: Option<String>,
    /// What the run reported about delivery, if anything.
    pub delivered: Option<bool>,
    pub delivery_attempted: bool,
    pub delivery_error: Option<String>,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
}

impl RunOutcome {
    pub fn ok(started_at_ms: i64, ended_at_ms: i64) -> Self {
        Self {
            status: RunStatus::Ok,
            error: None,
            summary: None,
            delivered: None,
            delivery_attempted: false,
            delivery_error: None,
            started_at_ms,
            ended_at_ms,
        }
    }

    pub fn skipped(reason: impl Into<String>, started_at_ms: i64, ended_at_ms: i64) -> Self {
        Self {
            status: RunStatus::Skipped,
            error: Some(reason.into()),
            ..Self::ok(started_at_ms, ended_at_ms)
        }
    }

    pub fn error(error: impl Into<String>, started_at_ms: i64, ended_at_ms: i64) -> Self {
        Self {
            status: RunStatus::Error,
            error: Some(error.into()),
            ..Self::ok(started_at_ms, ended_at_ms)
        }
    }
}

/// What the engine should do after the state update.
#[derive(Debug, Default)]
pub struct Disposition {
    /// Remove the job from the store (one-shot delete-after-run success).
    pub delete: bool,
    /// Emit this failure alert.
    pub alert: Option<FailureAlertMessage>,
    /// Resolved delivery status, for the finished event.
    pub delivery_status: DeliveryStatus,
}

/// Apply one run outcome to a job.
///
/// `delivery_requested` comes from the host's delivery-plan resolution;
/// `now_ms` is the clock reading at application time (alert cooldowns are
/// measured against it, not against the run's own timestamps).
pub fn apply_outcome(
    job: &mut Job,
    outcome: &RunOutcome,
    delivery_requested: bool,
    config: &SchedulerConfig,
    classifier: &ErrorClassifier,
    now_ms: i64,
) -> Disposition {
    let mut disposition = Disposition::default();

    // Telemetry, recorded for every outcome.
    job.state.running_at_ms = None;
    job.state.last_run_at_ms = Some(outcome.started_at_ms);
    job.state.last_run_status = Some(outcome.status);
    job.state.last_duration_ms = Some(outcome.ended_at_ms - outcome.started_at_ms);
    job.state.last_error = outcome.error.clone();
    job.state.last_delivered = outcome.delivered;

    // Delivery status never feeds the error counter; a failed announcement
    // of a successful run is not a failed run.
    let delivery_status = match outcome.delivered {
        Some(true) => DeliveryStatus::Delivered,
        Some(false) => DeliveryStatus::NotDelivered,
        None if delivery_requested => DeliveryStatus::Unknown,
        None => DeliveryStatus::NotRequested,
    };
    job.state.last_delivery_status = Some(delivery_status);
    job.state.last_delivery_error = outcome.delivery_error.clone();
    disposition.delivery_status = delivery_status;

    // Error counting and alert gating.
    if outcome.status == RunStatus::Error {
        job.state.consecutive_errors += 1;
        disposition.alert = gate_failure_alert(job, config, now_ms);
    } else {
        job.state.consecutive_errors = 0;
        job.state.last_failure_alert_at_ms = None;
    }

    // Lifecycle and rescheduling.
    if job.schedule.is_one_shot() {
        apply_one_shot(job, outcome, config, classifier, &mut disposition);
    } else {
        apply_recurring(job, outcome, config);
    }

    job.updated_at_ms = now_ms;
    disposition
}

/// Emit at most one alert per cooldown window per job.
fn gate_failure_alert(
    job: &mut Job,
    config: &SchedulerConfig,
    now_ms: i64,
) -> Option<FailureAlertMessage> {
    let policy = job.resolve_failure_alert(config.failure_alert.as_ref())?;
    if job.state.consecutive_errors < policy.after {
        return None;
    }
    if let Some(last) = job.state.last_failure_alert_at_ms
        && now_ms - last < policy.cooldown_ms
    {
        debug!(job_id = %job.id, "failure alert suppressed by cooldown");
        return None;
    }

    let error_text = job
        .state
        .last_error
        .as_deref()
        .map(|e| truncate_chars(e, ALERT_ERROR_MAX_CHARS))
        .unwrap_or_else(|| "unknown error".to_string());
    let text = format!(
        "Job \"{}\" failed {} times: {}",
        job.name, job.state.consecutive_errors, error_text
    );

    let (channel, to) = (policy.channel.clone(), policy.to.clone());
    job.state.last_failure_alert_at_ms = Some(now_ms);
    Some(FailureAlertMessage {
        job_id: job.id.clone(),
        job_name: job.name.clone(),
        text,
        channel,
        to,
    })
}

/// One-shot jobs reach a terminal state after success, skip, or exhausted
/// retries; only a transient failure with attempts left re-arms them.
fn apply_one_shot(
    job: &mut Job,
    outcome: &RunOutcome,
    config: &SchedulerConfig,
    classifier: &ErrorClassifier,
    disposition: &mut Disposition,
) {
    match outcome.status {
        RunStatus::Ok if job.delete_after_run => {
            disposition.delete = true;
        }
        RunStatus::Ok | RunStatus::Skipped => {
            job.enabled = false;
            job.state.next_run_at_ms = None;
        }
        RunStatus::Error => {
            let error = outcome.error.as_deref().unwrap_or("");
            let transient = classifier.is_transient(error);
            if transient && job.state.consecutive_errors <= config.max_attempts {
                let backoff = config.backoff_ms(job.state.consecutive_errors);
                job.state.next_run_at_ms = Some(outcome.ended_at_ms + backoff);
                debug!(
                    job_id = %job.id,
                    attempt = job.state.consecutive_errors,
                    backoff_ms = backoff,
                    "one-shot job failed, retry scheduled"
                );
            } else {
                // Permanent or exhausted: keep the job around, disabled,
                // so the failure stays visible to operators.
                job.enabled = false;
                job.state.next_run_at_ms = None;
                warn!(
                    job_id = %job.id,
                    transient,
                    consecutive_errors = job.state.consecutive_errors,
                    "one-shot job disabled after failure"
                );
            }
        }
    }
}

/// Recurring jobs reschedule from the run's end; errors push the next slot
/// out to at least the backoff delay.
fn apply_recurring(job: &mut Job, outcome: &RunOutcome, config: &SchedulerConfig) {
    if !job.enabled {
        job.state.next_run_at_ms = None;
        return;
    }

    let natural = next_run_with_floor(&job.schedule, outcome.ended_at_ms, outcome.ended_at_ms);
    job.state.next_run_at_ms = match outcome.status {
        RunStatus::Error => {
            let backoff_slot =
                outcome.ended_at_ms + config.backoff_ms(job.state.consecutive_errors);
            Some(natural.map_or(backoff_slot, |n| n.max(backoff_slot)))
        }
        _ => {
            if natural.is_none() {
                warn!(job_id = %job.id, "schedule produced no next run; job will not re-fire");
            }
            natural
        }
    };
}

/// Truncate to a maximum number of characters (not bytes).
/// Safe for UTF-8 strings with multi-byte characters.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use solstice_store::{FailureAlert, FailureAlertPolicy, Payload, Schedule};

    fn one_shot_job(at_ms: i64) -> Job {
        let mut job = Job::new(
            "once",
            Schedule::At { at_ms },
            Payload::SystemEvent {
                text: "fire".to_string(),
            },
            0,
        );
        job.state.next_run_at_ms = Some(at_ms);
        job
    }

    fn interval_job(every_ms: i64) -> Job {
        Job::new(
            "recurring",
            Schedule::Every { every_ms },
            Payload::SystemEvent {
                text: "tick".to_string(),
            },
            0,
        )
    }

    fn apply(
        job: &mut Job,
        outcome: &RunOutcome,
        config: &SchedulerConfig,
        now_ms: i64,
    ) -> Disposition {
        apply_outcome(
            job,
            outcome,
            false,
            config,
            &ErrorClassifier::default(),
            now_ms,
        )
    }

    #[test]
    fn test_telemetry_recorded() {
        let mut job = interval_job(60_000);
        let outcome = RunOutcome::ok(10_000, 12_500);
        apply(&mut job, &outcome, &SchedulerConfig::default(), 13_000);

        assert_eq!(job.state.last_run_at_ms, Some(10_000));
        assert_eq!(job.state.last_run_status, Some(RunStatus::Ok));
        assert_eq!(job.state.last_duration_ms, Some(2_500));
        assert_eq!(job.state.running_at_ms, None);
        assert_eq!(job.updated_at_ms, 13_000);
    }

    #[test]
    fn test_delivery_status_resolution() {
        let config = SchedulerConfig::default();
        let classifier = ErrorClassifier::default();

        let mut job = interval_job(60_000);
        let mut outcome = RunOutcome::ok(0, 1);
        outcome.delivered = Some(true);
        let d = apply_outcome(&mut job, &outcome, true, &config, &classifier, 2);
        assert_eq!(d.delivery_status, DeliveryStatus::Delivered);

        outcome.delivered = Some(false);
        let d = apply_outcome(&mut job, &outcome, true, &config, &classifier, 2);
        assert_eq!(d.delivery_status, DeliveryStatus::NotDelivered);

        outcome.delivered = None;
        let d = apply_outcome(&mut job, &outcome, true, &config, &classifier, 2);
        assert_eq!(d.delivery_status, DeliveryStatus::Unknown);

        let d = apply_outcome(&mut job, &outcome, false, &config, &classifier, 2);
        assert_eq!(d.delivery_status, DeliveryStatus::NotRequested);
    }

    #[test]
    fn test_delivery_error_does_not_count_as_failure() {
        let mut job = interval_job(60_000);
        let mut outcome = RunOutcome::ok(0, 1);
        outcome.delivered = Some(false);
        outcome.delivery_error = Some("channel rejected message".to_string());
        apply(&mut job, &outcome, &SchedulerConfig::default(), 2);

        assert_eq!(job.state.consecutive_errors, 0);
        assert_eq!(
            job.state.last_delivery_error.as_deref(),
            Some("channel rejected message")
        );
    }

    #[test]
    fn test_one_shot_success_disables() {
        let mut job = one_shot_job(5_000);
        let d = apply(
            &mut job,
            &RunOutcome::ok(5_000, 5_100),
            &SchedulerConfig::default(),
            5_200,
        );
        assert!(!d.delete);
        assert!(!job.enabled);
        assert_eq!(job.state.next_run_at_ms, None);
    }

    #[test]
    fn test_one_shot_skip_is_terminal() {
        let mut job = one_shot_job(5_000);
        let d = apply(
            &mut job,
            &RunOutcome::skipped("empty payload", 5_000, 5_001),
            &SchedulerConfig::default(),
            5_200,
        );
        assert!(!d.delete);
        assert!(!job.enabled);
        assert_eq!(job.state.next_run_at_ms, None);
    }

    #[test]
    fn test_one_shot_delete_after_run() {
        let mut job = one_shot_job(5_000);
        job.delete_after_run = true;
        let d = apply(
            &mut job,
            &RunOutcome::ok(5_000, 5_100),
            &SchedulerConfig::default(),
            5_200,
        );
        assert!(d.delete);
    }

    #[test]
    fn test_one_shot_delete_after_run_only_on_success() {
        let mut job = one_shot_job(5_000);
        job.delete_after_run = true;
        let d = apply(
            &mut job,
            &RunOutcome::skipped("nothing to do", 5_000, 5_100),
            &SchedulerConfig::default(),
            5_200,
        );
        assert!(!d.delete);
        assert!(!job.enabled);
    }

    #[test]
    fn test_one_shot_transient_retry_ladder_then_disable() {
        let config = SchedulerConfig::default();
        let mut job = one_shot_job(5_000);
        let expected_backoffs = [30_000, 60_000, 300_000];

        let mut ended = 5_100;
        for (i, backoff) in expected_backoffs.iter().enumerate() {
            let outcome = RunOutcome::error("request timed out", ended - 100, ended);
            apply(&mut job, &outcome, &config, ended);
            assert_eq!(job.state.consecutive_errors, i as u32 + 1);
            assert!(job.enabled, "attempt {} should keep the job enabled", i + 1);
            assert_eq!(job.state.next_run_at_ms, Some(ended + backoff));
            ended += backoff + 100;
        }

        // Fourth consecutive failure exhausts max_attempts = 3.
        let outcome = RunOutcome::error("request timed out", ended - 100, ended);
        apply(&mut job, &outcome, &config, ended);
        assert_eq!(job.state.consecutive_errors, 4);
        assert!(!job.enabled);
        assert_eq!(job.state.next_run_at_ms, None);
        // Still in the store for inspection.
        assert_eq!(job.state.last_error.as_deref(), Some("request timed out"));
    }

    #[test]
    fn test_one_shot_permanent_error_disables_immediately() {
        let mut job = one_shot_job(5_000);
        let outcome = RunOutcome::error("invalid api key", 5_000, 5_100);
        apply(&mut job, &outcome, &SchedulerConfig::default(), 5_200);
        assert!(!job.enabled);
        assert_eq!(job.state.next_run_at_ms, None);
        assert_eq!(job.state.consecutive_errors, 1);
    }

    #[test]
    fn test_recurring_success_reschedules_naturally() {
        let mut job = interval_job(60_000);
        apply(
            &mut job,
            &RunOutcome::ok(10_000, 12_000),
            &SchedulerConfig::default(),
            12_500,
        );
        assert_eq!(job.state.next_run_at_ms, Some(72_000));
        assert!(job.enabled);
    }

    #[test]
    fn test_recurring_error_takes_max_of_natural_and_backoff() {
        let config = SchedulerConfig::default();

        // Short interval: backoff (30s) dominates the natural next (5s).
        let mut fast = interval_job(5_000);
        apply(&mut fast, &RunOutcome::error("503", 0, 1_000), &config, 1_100);
        assert_eq!(fast.state.next_run_at_ms, Some(1_000 + 30_000));

        // Long interval: the natural next dominates the backoff.
        let mut slow = interval_job(3_600_000);
        apply(&mut slow, &RunOutcome::error("503", 0, 1_000), &config, 1_100);
        assert_eq!(slow.state.next_run_at_ms, Some(1_000 + 3_600_000));
    }

    #[test]
    fn test_recurring_error_counter_resets_on_success() {
        let config = SchedulerConfig::default();
        let mut job = interval_job(1_000);
        apply(&mut job, &RunOutcome::error("503", 0, 100), &config, 200);
        apply(&mut job, &RunOutcome::error("503", 0, 100), &config, 200);
        assert_eq!(job.state.consecutive_errors, 2);

        apply(&mut job, &RunOutcome::ok(0, 100), &config, 200);
        assert_eq!(job.state.consecutive_errors, 0);
        assert_eq!(job.state.last_failure_alert_at_ms, None);
    }

    #[test]
    fn test_disabled_recurring_clears_next_run() {
        let mut job = interval_job(1_000);
        job.enabled = false;
        job.state.next_run_at_ms = Some(500);
        apply(
            &mut job,
            &RunOutcome::ok(0, 100),
            &SchedulerConfig::default(),
            200,
        );
        assert_eq!(job.state.next_run_at_ms, None);
    }

    #[test]
    fn test_alert_cooldown_gating() {
        // after: 2, cooldown: 60s. Four failures with a clock advance after
        // the second produce exactly two alerts: after #2 and after #4.
        let config = SchedulerConfig::default();
        let mut job = interval_job(1_000);
        job.failure_alert = Some(FailureAlert::Policy(FailureAlertPolicy {
            after: 2,
            cooldown_ms: 60_000,
            channel: None,
            to: None,
        }));

        let mut now = 1_000;
        let mut alerts = Vec::new();
        for run in 1..=4 {
            let outcome = RunOutcome::error("503", now - 100, now);
            let d = apply(&mut job, &outcome, &config, now);
            if let Some(alert) = d.alert {
                alerts.push((run, alert.text));
            }
            if run == 2 {
                now += 60_000;
            }
        }

        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].0, 2);
        assert!(alerts[0].1.contains("failed 2 times"));
        assert_eq!(alerts[1].0, 4);
        assert!(alerts[1].1.contains("failed 4 times"));
    }

    #[test]
    fn test_per_job_override_beats_disabled_default() {
        // Process-wide policy off; per-job override alerts on first failure.
        let config = SchedulerConfig::default();
        assert!(config.failure_alert.is_none());

        let mut job = interval_job(1_000);
        job.failure_alert = Some(FailureAlert::Policy(FailureAlertPolicy {
            after: 1,
            cooldown_ms: 1,
            channel: Some("telegram".to_string()),
            to: Some("12345".to_string()),
        }));

        let d = apply(&mut job, &RunOutcome::error("boom", 0, 100), &config, 200);
        let alert = d.alert.expect("override should alert on first failure");
        assert_eq!(alert.channel.as_deref(), Some("telegram"));
        assert_eq!(alert.to.as_deref(), Some("12345"));
    }

    #[test]
    fn test_alert_suppressed_when_disabled_on_job() {
        let mut config = SchedulerConfig::default();
        config.failure_alert = Some(FailureAlertPolicy {
            after: 1,
            cooldown_ms: 1,
            channel: None,
            to: None,
        });

        let mut job = interval_job(1_000);
        job.failure_alert = Some(FailureAlert::Toggle(false));

        for _ in 0..5 {
            let d = apply(&mut job, &RunOutcome::error("boom", 0, 100), &config, 200);
            assert!(d.alert.is_none());
        }
    }

    #[test]
    fn test_alert_error_text_truncated() {
        let config = SchedulerConfig::default();
        let mut job = interval_job(1_000);
        job.failure_alert = Some(FailureAlert::Policy(FailureAlertPolicy {
            after: 1,
            cooldown_ms: 1,
            channel: None,
            to: None,
        }));

        let long_error = "x".repeat(500);
        let d = apply(&mut job, &RunOutcome::error(long_error, 0, 100), &config, 200);
        let alert = d.alert.unwrap();
        assert!(alert.text.contains(&format!("{}...", "x".repeat(200))));
        assert!(!alert.text.contains(&"x".repeat(201)));
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
    }
}
